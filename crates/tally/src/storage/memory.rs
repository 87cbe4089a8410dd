//! In-memory cache implementation
//!
//! Used by tests and by callers that do not need resumability.

use anyhow::Result;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::RecordCache;
use crate::models::Email;

/// Cache held in process memory
#[derive(Debug, Default)]
pub struct InMemoryCache {
    emails: RwLock<Vec<Email>>,
    checkpoints: AtomicUsize,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing snapshot
    pub fn with_emails(emails: Vec<Email>) -> Self {
        Self {
            emails: RwLock::new(emails),
            checkpoints: AtomicUsize::new(0),
        }
    }

    /// Number of checkpoints written so far
    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Vec<Email> {
        self.load()
    }
}

impl RecordCache for InMemoryCache {
    fn load(&self) -> Vec<Email> {
        match self.emails.read() {
            Ok(emails) => emails.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn checkpoint(&self, emails: &[Email]) -> Result<()> {
        let mut stored = self
            .emails
            .write()
            .map_err(|_| anyhow::anyhow!("Cache lock poisoned"))?;
        *stored = emails.to_vec();
        self.checkpoints.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.emails
            .write()
            .map_err(|_| anyhow::anyhow!("Cache lock poisoned"))?
            .clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordId;

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
    fn test_checkpoint_replaces_contents() {
        let cache = InMemoryCache::with_emails(vec![email("old")]);
        cache.checkpoint(&[email("m1"), email("m2")]).unwrap();
        assert_eq!(cache.load().len(), 2);
        assert_eq!(cache.checkpoint_count(), 1);
    }

    #[test]
    fn test_clear() {
        let cache = InMemoryCache::with_emails(vec![email("m1")]);
        cache.clear().unwrap();
        assert!(cache.load().is_empty());
    }
}
