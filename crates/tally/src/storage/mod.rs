//! Resumable cache
//!
//! The cache persists every record ingested so far, keyed by record
//! identifier. The engine loads it before fetching, merges each completed
//! batch into it and rewrites it wholesale at batch boundaries, so an
//! interrupted run resumes after the last completed batch.

mod file;
mod memory;
mod traits;

pub use file::JsonFileCache;
pub use memory::InMemoryCache;
pub use traits::RecordCache;

use std::collections::HashSet;

use crate::models::{Email, RecordId};

/// Records from `new` whose identifiers are not yet known
///
/// Drops anything already in `existing_ids` and repeated identifiers within
/// `new` itself (first occurrence wins). Input order is preserved.
pub fn merge(existing_ids: &HashSet<RecordId>, new: Vec<Email>) -> Vec<Email> {
    let mut seen = HashSet::new();
    new.into_iter()
        .filter(|email| {
            !existing_ids.contains(&email.record_id) && seen.insert(email.record_id.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(id: &str) -> Email {
        Email {
            record_id: RecordId::new(id),
            sender_address: "a@x.com".to_string(),
            sender_display_name: String::new(),
            subject: String::new(),
            raw_date: String::new(),
            sent_at: None,
        }
    }

    fn ids(emails: &[Email]) -> Vec<&str> {
        emails.iter().map(|e| e.record_id.as_str()).collect()
    }

    #[test]
    fn test_merge_skips_existing() {
        let existing: HashSet<RecordId> = [RecordId::new("m1")].into_iter().collect();
        let added = merge(&existing, vec![email("m1"), email("m2")]);
        assert_eq!(ids(&added), vec!["m2"]);
    }

    #[test]
    fn test_merge_drops_duplicates_within_batch() {
        let added = merge(&HashSet::new(), vec![email("m1"), email("m2"), email("m1")]);
        assert_eq!(ids(&added), vec!["m1", "m2"]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let batch = vec![email("a"), email("b"), email("c")];
        let mut cache: Vec<Email> = Vec::new();

        for _ in 0..2 {
            let existing: HashSet<RecordId> = cache.iter().map(|e| e.record_id.clone()).collect();
            cache.extend(merge(&existing, batch.clone()));
        }

        assert_eq!(ids(&cache), vec!["a", "b", "c"]);
    }
}
