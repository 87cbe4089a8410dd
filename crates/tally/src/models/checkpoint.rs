//! Cache checkpoint: the persisted snapshot of everything ingested so far

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{Email, RecordId};

/// Snapshot written by the resumable cache at batch boundaries
///
/// The on-disk form carries `saved_at`, `total_count` and the full record
/// list. `record_ids_seen` is rebuilt from the records on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheCheckpoint {
    #[serde(default, alias = "timestamp", with = "super::email::iso_naive")]
    pub saved_at: Option<NaiveDateTime>,
    #[serde(default, alias = "email_count")]
    pub total_count: usize,
    pub emails: Vec<Email>,
    #[serde(skip)]
    pub record_ids_seen: HashSet<RecordId>,
}

impl CacheCheckpoint {
    /// Build a fresh snapshot of `emails`, stamped now
    pub fn new(emails: Vec<Email>) -> Self {
        let record_ids_seen = emails.iter().map(|e| e.record_id.clone()).collect();
        Self {
            saved_at: Some(Utc::now().naive_utc()),
            total_count: emails.len(),
            emails,
            record_ids_seen,
        }
    }
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

    #[test]
    fn test_new_checkpoint_tracks_ids() {
        let checkpoint = CacheCheckpoint::new(vec![email("m1"), email("m2")]);
        assert_eq!(checkpoint.total_count, 2);
        assert!(checkpoint.record_ids_seen.contains("m1"));
        assert!(checkpoint.saved_at.is_some());
    }

    #[test]
    fn test_serialized_layout() {
        let checkpoint = CacheCheckpoint::new(vec![email("m1")]);
        let json = serde_json::to_value(&checkpoint).unwrap();
        assert_eq!(json["total_count"], 1);
        assert!(json["saved_at"].as_str().unwrap().ends_with('Z'));
        assert!(json.get("record_ids_seen").is_none());
    }
}
