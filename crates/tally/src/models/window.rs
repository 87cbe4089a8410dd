//! Fetch window: the inclusive calendar-date range of an ingestion run

use chrono::{Days, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Accepted input formats for window dates
const DATE_FORMATS: &[&str] = &["%Y/%m/%d", "%Y-%m-%d"];

/// Inclusive `start..=end` date range
///
/// The canonical membership test compares the UTC calendar date of a message
/// against both bounds, so `end` covers the whole day. Remote transports only
/// offer an exclusive "before" bound; they are queried with
/// [`FetchWindow::exclusive_end`], which is `end` plus one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FetchWindow {
    /// Create a window, rejecting `start > end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ConfigError> {
        if start > end {
            return Err(ConfigError::InvertedWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse `YYYY/MM/DD` or `YYYY-MM-DD` bounds
    pub fn parse(start: &str, end: &str) -> Result<Self, ConfigError> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    /// Whether an instant falls on a date inside the window
    pub fn contains(&self, instant: NaiveDateTime) -> bool {
        let date = instant.date();
        self.start <= date && date <= self.end
    }

    /// First date after the window, for transports with an exclusive bound
    pub fn exclusive_end(&self) -> NaiveDate {
        self.end.checked_add_days(Days::new(1)).unwrap_or(NaiveDate::MAX)
    }

    /// Search query for the paginated mail API (`after:` / `before:`)
    pub fn api_query(&self) -> String {
        format!(
            "after:{} before:{}",
            self.start.format("%Y/%m/%d"),
            self.exclusive_end().format("%Y/%m/%d")
        )
    }

    /// Search criteria for the bulk mailbox protocol (`SINCE` / `BEFORE`)
    pub fn protocol_criteria(&self) -> String {
        format!(
            "SINCE {} BEFORE {}",
            self.start.format("%d-%b-%Y"),
            self.exclusive_end().format("%d-%b-%Y")
        )
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, ConfigError> {
    let s = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .ok_or_else(|| ConfigError::InvalidDate(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_both_formats() {
        let a = FetchWindow::parse("2025/06/01", "2025/06/30").unwrap();
        let b = FetchWindow::parse("2025-06-01", "2025-06-30").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.start, date(2025, 6, 1));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            FetchWindow::parse("06/01/2025", "2025/06/30"),
            Err(ConfigError::InvalidDate(_))
        ));
        assert!(matches!(
            FetchWindow::parse("2025/07/01", "2025/06/30"),
            Err(ConfigError::InvertedWindow { .. })
        ));
    }

    #[test]
    fn test_single_day_window_includes_whole_day() {
        let window = FetchWindow::parse("2025/06/01", "2025/06/01").unwrap();
        assert!(window.contains(date(2025, 6, 1).and_hms_opt(0, 0, 0).unwrap()));
        assert!(window.contains(date(2025, 6, 1).and_hms_opt(12, 0, 0).unwrap()));
        assert!(window.contains(date(2025, 6, 1).and_hms_opt(23, 59, 59).unwrap()));
        assert!(!window.contains(date(2025, 6, 2).and_hms_opt(0, 0, 0).unwrap()));
        assert!(!window.contains(date(2025, 5, 31).and_hms_opt(23, 59, 59).unwrap()));
    }

    #[test]
    fn test_remote_queries_use_exclusive_end_plus_one_day() {
        let window = FetchWindow::parse("2025/06/01", "2025/06/01").unwrap();
        assert_eq!(window.exclusive_end(), date(2025, 6, 2));
        assert_eq!(window.api_query(), "after:2025/06/01 before:2025/06/02");
        assert_eq!(window.protocol_criteria(), "SINCE 01-Jun-2025 BEFORE 02-Jun-2025");
    }

    #[test]
    fn test_exclusive_end_rolls_over_year() {
        let window = FetchWindow::parse("2024/12/01", "2024/12/31").unwrap();
        assert_eq!(window.exclusive_end(), date(2025, 1, 1));
    }
}
