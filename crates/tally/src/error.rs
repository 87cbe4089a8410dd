//! Error taxonomy for ingestion
//!
//! Most operations return `anyhow::Result`. Two conditions need a type the
//! engine can recognise: configuration problems, which are fatal before any
//! fetching starts, and permanent transport failures, which must not be retried.

use std::path::PathBuf;

use chrono::NaiveDate;

/// Invalid input detected before ingestion begins
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid date '{0}': expected YYYY/MM/DD or YYYY-MM-DD")]
    InvalidDate(String),

    #[error("window start {start} is after window end {end}")]
    InvertedWindow { start: NaiveDate, end: NaiveDate },

    #[error("archive path not found: {}", .0.display())]
    MissingPath(PathBuf),

    #[error("no mbox archives found under {}", .0.display())]
    NoArchives(PathBuf),

    #[error("credentials unavailable: {0}")]
    Credentials(String),

    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

/// A transport failure that will not succeed on retry
///
/// Adapters wrap malformed permanent responses (HTTP 400, 404, unparseable
/// payloads) in this type. The retry policy looks for it anywhere in the
/// error chain.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PermanentError(pub String);

impl PermanentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Check whether an error chain contains a [`PermanentError`]
pub fn is_permanent(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<PermanentError>())
}
