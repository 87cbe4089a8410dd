//! Engine settings
//!
//! Settings are resolved in this order:
//! 1. Built-in defaults
//! 2. `settings.json` in the Tally config directory, when present
//! 3. Environment overrides (`TALLY_BATCH_SIZE`, `TALLY_CONCURRENCY`, `TALLY_CACHE_FILE`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Settings filename in the Tally config directory
pub const SETTINGS_FILE: &str = "settings.json";

/// Default cache filename in the Tally config directory
pub const CACHE_FILE: &str = "cache.json";

/// Retry parameters for one class of request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub max_jitter_ms: u64,
}

fn default_jitter_ms() -> u64 {
    500
}

impl RetrySettings {
    pub const fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_jitter_ms: 500,
        }
    }
}

/// Ingestion settings shared by every transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Identifiers per multiplexed fetch
    pub batch_size: usize,
    /// Identifiers per listing page (the API caps this at 500)
    pub page_size: usize,
    /// Simultaneous in-flight requests for the paginated API
    pub concurrency: usize,
    /// Subjects longer than this are cut; `None` keeps them whole
    pub subject_max_chars: Option<usize>,
    /// Completed batches between cache checkpoints
    pub checkpoint_interval: usize,
    /// Drop remote records dated outside the window's calendar dates
    pub strict_window: bool,
    /// Cache location; defaults to `cache.json` in the config directory
    pub cache_file: Option<PathBuf>,
    /// Mailbox-protocol container to read instead of the automatic choice
    pub mailbox: Option<String>,
    /// IMAP server for the mailbox-protocol source (TLS only)
    pub imap_host: String,
    pub imap_port: u16,
    pub listing_retry: RetrySettings,
    pub detail_retry: RetrySettings,
    pub protocol_retry: RetrySettings,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            page_size: 500,
            concurrency: 10,
            subject_max_chars: Some(100),
            checkpoint_interval: 1,
            strict_window: true,
            cache_file: None,
            mailbox: None,
            imap_host: "imap.gmail.com".to_string(),
            imap_port: 993,
            listing_retry: RetrySettings::new(5, 2_000),
            detail_retry: RetrySettings::new(2, 1_000),
            protocol_retry: RetrySettings::new(3, 1_000),
        }
    }
}

impl IngestConfig {
    /// Load settings from the config directory and environment
    pub fn load() -> Result<Self> {
        let mut settings = ::config::load_json::<Self>(SETTINGS_FILE)?.unwrap_or_default();
        settings.apply_env()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let settings: Self = ::config::load_json_file(path)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self =
            serde_json::from_str(json).context("Failed to parse settings JSON")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `TALLY_*` environment overrides
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_usize("TALLY_BATCH_SIZE")? {
            self.batch_size = value;
        }
        if let Some(value) = env_usize("TALLY_CONCURRENCY")? {
            self.concurrency = value;
        }
        if let Ok(path) = std::env::var("TALLY_CACHE_FILE")
            && !path.is_empty()
        {
            self.cache_file = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be at least 1"));
        }
        if self.page_size == 0 {
            return Err(invalid("page_size", "must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(invalid("concurrency", "must be at least 1"));
        }
        if self.imap_host.trim().is_empty() {
            return Err(invalid("imap_host", "must not be empty"));
        }
        if self.checkpoint_interval == 0 {
            return Err(invalid("checkpoint_interval", "must be at least 1"));
        }
        for (name, retry) in [
            ("listing_retry", &self.listing_retry),
            ("detail_retry", &self.detail_retry),
            ("protocol_retry", &self.protocol_retry),
        ] {
            if !(1..=10).contains(&retry.max_attempts) {
                return Err(invalid(name, "max_attempts must be between 1 and 10"));
            }
        }
        Ok(())
    }

    /// Resolved cache path (explicit setting, else the config directory)
    pub fn cache_path(&self) -> Option<PathBuf> {
        self.cache_file
            .clone()
            .or_else(|| ::config::config_path(CACHE_FILE))
    }

    /// Listing page size clamped to what the API accepts
    pub fn effective_page_size(&self) -> usize {
        self.page_size.clamp(1, 500)
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        name,
        reason: reason.to_string(),
    }
}

fn env_usize(var: &'static str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(var, &format!("'{}' is not a number", value))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = IngestConfig::default();
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.concurrency, 10);
        assert_eq!(settings.page_size, 500);
        assert_eq!(settings.detail_retry.max_attempts, 2);
        assert_eq!((settings.imap_host.as_str(), settings.imap_port), ("imap.gmail.com", 993));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings = IngestConfig::from_json(r#"{ "concurrency": 4 }"#).unwrap();
        assert_eq!(settings.concurrency, 4);
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.listing_retry, RetrySettings::new(5, 2_000));
    }

    #[test]
    fn test_retry_jitter_defaults_when_omitted() {
        let json = r#"{ "detail_retry": { "max_attempts": 4, "base_delay_ms": 1500 } }"#;
        let settings = IngestConfig::from_json(json).unwrap();
        assert_eq!(settings.detail_retry.max_jitter_ms, 500);
        assert_eq!(settings.detail_retry.max_attempts, 4);
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let err = IngestConfig::from_json(r#"{ "batch_size": 0 }"#).unwrap_err();
        assert!(format!("{err:#}").contains("batch_size"));
    }

    #[test]
    fn test_rejects_out_of_range_retries() {
        let mut settings = IngestConfig::default();
        settings.protocol_retry.max_attempts = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidSetting { name: "protocol_retry", .. })
        ));
    }

    #[test]
    fn test_page_size_clamped() {
        let settings = IngestConfig {
            page_size: 2_000,
            ..IngestConfig::default()
        };
        assert_eq!(settings.effective_page_size(), 500);
    }

    #[test]
    fn test_explicit_cache_path_wins() {
        let settings = IngestConfig {
            cache_file: Some(PathBuf::from("/tmp/tally-cache.json")),
            ..IngestConfig::default()
        };
        assert_eq!(settings.cache_path(), Some(PathBuf::from("/tmp/tally-cache.json")));
    }
}
