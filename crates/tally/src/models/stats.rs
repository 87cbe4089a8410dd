//! Per-sender volume statistics

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Average month length used to turn a span in days into months
pub const DAYS_PER_MONTH: f64 = 30.44;

/// Volume statistics for one sender address
///
/// Always derived from scratch by [`crate::report::aggregate`]; never updated
/// in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderStats {
    pub address: String,
    /// Last non-empty display name observed for this address
    pub display_name: String,
    pub total_count: usize,
    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,
    /// Whole days between first and last message
    pub span_days: i64,
    /// Messages per month; the span is floored at one month
    pub monthly_rate: f64,
}

impl SenderStats {
    /// Compute `monthly_rate` for a count over a span in days
    pub fn rate(total_count: usize, span_days: i64) -> f64 {
        let months = (span_days as f64 / DAYS_PER_MONTH).max(1.0);
        total_count as f64 / months
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_floors_short_spans_at_one_month() {
        assert_eq!(SenderStats::rate(1, 0), 1.0);
        assert_eq!(SenderStats::rate(7, 12), 7.0);
    }

    #[test]
    fn test_rate_over_long_span() {
        let rate = SenderStats::rate(120, 365);
        assert!((rate - 120.0 / (365.0 / DAYS_PER_MONTH)).abs() < 1e-9);
    }
}
