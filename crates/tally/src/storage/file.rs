//! JSON file cache
//!
//! The file holds a [`CacheCheckpoint`]: a timestamp, a record count and the
//! full record list. Writes go to a temporary file that is then renamed over
//! the cache, so a crash mid-write leaves the previous snapshot intact.

use anyhow::{Context, Result};
use log::{debug, warn};
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::RecordCache;
use crate::models::{CacheCheckpoint, Email};

/// Cache persisted as a single JSON document
#[derive(Debug, Clone)]
pub struct JsonFileCache {
    path: PathBuf,
}

impl JsonFileCache {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl RecordCache for JsonFileCache {
    fn load(&self) -> Vec<Email> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No cache at {}", self.path.display());
                return Vec::new();
            }
            Err(e) => {
                warn!("Ignoring unreadable cache {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Value>(&contents) {
            Ok(document) => records_from_document(document, &self.path),
            Err(e) => {
                warn!("Ignoring corrupt cache {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    fn checkpoint(&self, emails: &[Email]) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).context("Failed to create cache directory")?;
        }

        let snapshot = CacheCheckpoint::new(emails.to_vec());
        let json = serde_json::to_vec(&snapshot).context("Failed to serialize cache")?;

        // Write atomically (write to temp, then rename)
        let temp_path = self.temp_path();
        fs::write(&temp_path, &json)
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}

/// Accept a checkpoint object or a bare record array, dropping bad records
fn records_from_document(document: Value, path: &Path) -> Vec<Email> {
    let items = match document {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("emails") {
            Some(Value::Array(items)) => items,
            _ => {
                warn!("Cache {} has no record list", path.display());
                return Vec::new();
            }
        },
        _ => {
            warn!("Cache {} has an unexpected layout", path.display());
            return Vec::new();
        }
    };

    let total = items.len();
    let emails: Vec<Email> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<Email>(item).ok())
        .filter(|email| !email.record_id.as_str().is_empty())
        .collect();

    if emails.len() < total {
        warn!(
            "Dropped {} incomplete record(s) from cache {}",
            total - emails.len(),
            path.display()
        );
    }
    emails
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordId;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn email(id: &str, day: u32) -> Email {
        Email {
            record_id: RecordId::new(id),
            sender_address: "a@x.com".to_string(),
            sender_display_name: "A".to_string(),
            subject: "hello".to_string(),
            raw_date: String::new(),
            sent_at: NaiveDate::from_ymd_opt(2025, 6, day).and_then(|d| d.and_hms_opt(12, 0, 0)),
        }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let cache = JsonFileCache::new(dir.path().join("cache.json"));
        assert!(cache.load().is_empty());
    }

    #[test]
    fn test_checkpoint_then_load() {
        let dir = TempDir::new().unwrap();
        let cache = JsonFileCache::new(dir.path().join("nested/cache.json"));
        let emails = vec![email("m1", 1), email("m2", 2)];

        cache.checkpoint(&emails).unwrap();
        assert_eq!(cache.load(), emails);
        assert!(!cache.temp_path().exists());

        let document: Value =
            serde_json::from_str(&fs::read_to_string(cache.path()).unwrap()).unwrap();
        assert_eq!(document["total_count"], 2);
        assert_eq!(document["emails"][0]["sent_at"], "2025-06-01T12:00:00Z");
        assert!(document["saved_at"].is_string());
    }

    #[test]
    fn test_checkpoint_replaces_not_appends() {
        let dir = TempDir::new().unwrap();
        let cache = JsonFileCache::new(dir.path().join("cache.json"));
        cache.checkpoint(&[email("m1", 1), email("m2", 2)]).unwrap();
        cache.checkpoint(&[email("m3", 3)]).unwrap();
        assert_eq!(cache.load(), vec![email("m3", 3)]);
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{\"emails\": [ {\"record_id\": \"m1\"").unwrap();
        assert!(JsonFileCache::new(&path).load().is_empty());
    }

    #[test]
    fn test_incomplete_records_are_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(
            &path,
            r#"{"emails": [
                {"record_id": "m1", "sender_address": "a@x.com", "sent_at": "2025-06-01T12:00:00+00:00"},
                {"sender_address": "no-id@x.com"},
                {"record_id": "", "sender_address": "empty-id@x.com"}
            ]}"#,
        )
        .unwrap();

        let emails = JsonFileCache::new(&path).load();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].sent_at, email("m1", 1).sent_at);
    }

    #[test]
    fn test_legacy_array_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(
            &path,
            r#"[{"message_id": "m1", "sender": "a@x.com", "sender_name": "A",
                 "date": "Sun, 1 Jun 2025 12:00:00 +0000", "timestamp": "2025-06-01 12:00:00"}]"#,
        )
        .unwrap();

        let emails = JsonFileCache::new(&path).load();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].record_id, RecordId::new("m1"));
        assert_eq!(emails[0].sender_display_name, "A");
        assert_eq!(emails[0].sent_at, email("m1", 1).sent_at);
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = TempDir::new().unwrap();
        let cache = JsonFileCache::new(dir.path().join("cache.json"));
        cache.checkpoint(&[email("m1", 1)]).unwrap();
        cache.clear().unwrap();
        assert!(!cache.path().exists());
        cache.clear().unwrap();
    }
}
