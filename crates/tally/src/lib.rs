//! Tally - mail sender statistics engine
//!
//! This crate provides:
//! - Header normalization (sender address, display name, UTC send time)
//! - Three interchangeable sources: a paginated mail API, a bulk mailbox
//!   protocol session and local mbox archives
//! - Retry with backoff and a concurrency governor for remote sources
//! - A resumable cache checkpointed at batch boundaries
//! - Per-sender volume statistics
//!
//! Authentication, argument parsing and result rendering are left to the
//! caller.

pub mod config;
pub mod error;
pub mod gmail;
pub mod governor;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod report;
pub mod retry;
pub mod source;
pub mod storage;

pub use config::{IngestConfig, RetrySettings};
pub use error::{ConfigError, PermanentError, is_permanent};
pub use gmail::{GmailClient, MessageApi, StaticToken, TokenProvider};
pub use governor::Governor;
pub use ingest::{
    CancelToken, IngestEvent, IngestObserver, IngestOptions, IngestReport, IngestTally,
    LogObserver, ingest,
};
pub use models::{CacheCheckpoint, Email, FetchWindow, RecordId, SenderStats};
pub use normalize::{NormalizedHeader, normalize};
pub use report::{aggregate, top_senders};
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
pub use source::{ImapCredentials, ImapSession, MailboxSession, Source, SourceKind};
pub use storage::{InMemoryCache, JsonFileCache, RecordCache, merge};
