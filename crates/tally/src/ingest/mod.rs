//! Ingestion engine
//!
//! Drives a [`Source`](crate::source::Source) for one window, normalizes
//! every fetched record, deduplicates against the cache and checkpoints at
//! batch boundaries.

mod cancel;
mod engine;
mod events;

pub use cancel::CancelToken;
pub use engine::{IngestOptions, IngestReport, IngestTally, ingest};
pub use events::{IngestEvent, IngestObserver, LogObserver};
