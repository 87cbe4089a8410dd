//! Sender aggregation
//!
//! A single pass over the records groups them by lower-cased address. Counts,
//! first/last seen, span and monthly rate do not depend on input order; the
//! display name does (last non-empty value wins).

use chrono::NaiveDateTime;
use std::collections::HashMap;

use crate::models::{Email, SenderStats};

struct Accumulator {
    address: String,
    display_name: String,
    total_count: usize,
    first_seen: NaiveDateTime,
    last_seen: NaiveDateTime,
}

impl Accumulator {
    fn finish(self) -> SenderStats {
        let span_days = (self.last_seen - self.first_seen).num_days();
        SenderStats {
            monthly_rate: SenderStats::rate(self.total_count, span_days),
            address: self.address,
            display_name: self.display_name,
            total_count: self.total_count,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            span_days,
        }
    }
}

/// Per-sender statistics, busiest sender first
///
/// Records without an address or without a parsed `sent_at` are skipped.
/// Senders with equal counts keep the order in which they were first seen.
pub fn aggregate<'a, I>(emails: I) -> Vec<SenderStats>
where
    I: IntoIterator<Item = &'a Email>,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Accumulator> = Vec::new();

    for email in emails {
        let Some(sent_at) = email.sent_at else {
            continue;
        };
        let address = email.sender_address.trim().to_lowercase();
        if address.is_empty() {
            continue;
        }

        match index.get(&address) {
            Some(&i) => {
                let group = &mut groups[i];
                group.total_count += 1;
                group.first_seen = group.first_seen.min(sent_at);
                group.last_seen = group.last_seen.max(sent_at);
                if !email.sender_display_name.is_empty() {
                    group.display_name.clone_from(&email.sender_display_name);
                }
            }
            None => {
                index.insert(address.clone(), groups.len());
                groups.push(Accumulator {
                    address,
                    display_name: email.sender_display_name.clone(),
                    total_count: 1,
                    first_seen: sent_at,
                    last_seen: sent_at,
                });
            }
        }
    }

    let mut stats: Vec<SenderStats> = groups.into_iter().map(Accumulator::finish).collect();
    // Stable: ties stay in first-encounter order
    stats.sort_by(|a, b| b.total_count.cmp(&a.total_count));
    stats
}

/// The `n` busiest senders
pub fn top_senders<'a, I>(emails: I, n: usize) -> Vec<SenderStats>
where
    I: IntoIterator<Item = &'a Email>,
{
    let mut stats = aggregate(emails);
    stats.truncate(n);
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordId;
    use chrono::NaiveDate;

    fn email(id: &str, address: &str, name: &str, date: Option<(i32, u32, u32)>) -> Email {
        Email {
            record_id: RecordId::new(id),
            sender_address: address.to_string(),
            sender_display_name: name.to_string(),
            subject: String::new(),
            raw_date: String::new(),
            sent_at: date.map(|(y, m, d)| {
                NaiveDate::from_ymd_opt(y, m, d)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            }),
        }
    }

    #[test]
    fn test_counts_and_span() {
        let emails = vec![
            email("1", "a@x.com", "A", Some((2025, 1, 1))),
            email("2", "a@x.com", "A", Some((2025, 3, 2))),
            email("3", "b@x.com", "B", Some((2025, 2, 1))),
        ];
        let stats = aggregate(&emails);

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].address, "a@x.com");
        assert_eq!(stats[0].total_count, 2);
        assert_eq!(stats[0].span_days, 60);
        // 2 messages over 60 / 30.44 months
        assert!((stats[0].monthly_rate - 1.0147).abs() < 1e-3);
        assert_eq!(stats[1].span_days, 0);
        assert_eq!(stats[1].monthly_rate, 1.0);
    }

    #[test]
    fn test_skips_unusable_records() {
        let emails = vec![
            email("1", "", "Nobody", Some((2025, 1, 1))),
            email("2", "a@x.com", "A", None),
        ];
        assert!(aggregate(&emails).is_empty());
    }

    #[test]
    fn test_groups_case_insensitively() {
        let emails = vec![
            email("1", "News@Shop.com", "", Some((2025, 1, 1))),
            email("2", "news@shop.com", "", Some((2025, 1, 5))),
        ];
        let stats = aggregate(&emails);
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].address, "news@shop.com");
        assert_eq!(stats[0].total_count, 2);
    }

    #[test]
    fn test_ties_keep_first_encounter_order() {
        let emails = vec![
            email("1", "c@x.com", "", Some((2025, 1, 1))),
            email("2", "a@x.com", "", Some((2025, 1, 2))),
            email("3", "b@x.com", "", Some((2025, 1, 3))),
            email("4", "b@x.com", "", Some((2025, 1, 4))),
        ];
        let order: Vec<String> = aggregate(&emails).into_iter().map(|s| s.address).collect();
        assert_eq!(order, vec!["b@x.com", "c@x.com", "a@x.com"]);
    }

    #[test]
    fn test_display_name_last_non_empty_wins() {
        let emails = vec![
            email("1", "a@x.com", "First", Some((2025, 1, 1))),
            email("2", "a@x.com", "Second", Some((2025, 1, 2))),
            email("3", "a@x.com", "", Some((2025, 1, 3))),
        ];
        assert_eq!(aggregate(&emails)[0].display_name, "Second");
    }

    #[test]
    fn test_top_senders_truncates() {
        let emails: Vec<Email> = (0..5)
            .map(|i| email(&i.to_string(), &format!("s{}@x.com", i), "", Some((2025, 1, 1))))
            .collect();
        assert_eq!(top_senders(&emails, 3).len(), 3);
    }
}
