//! Ingestion progress and diagnostic events

use log::{debug, info, warn};
use std::path::PathBuf;

use crate::models::RecordId;

/// Something that happened during an ingestion run
#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    /// Records restored from the cache before fetching
    CacheLoaded { records: usize },
    /// Listing progress: identifiers collected so far
    IdsListed {
        listed: usize,
        estimate: Option<u32>,
    },
    /// Listed identifiers split into already-cached and still-to-fetch
    CacheFiltered { hits: usize, misses: usize },
    /// A batch finished fetching; `index` counts from zero
    BatchCompleted {
        index: usize,
        succeeded: usize,
        failed: usize,
    },
    /// A record could not be fetched or parsed
    RecordFailed { record_id: RecordId, reason: String },
    /// An archive file could not be read and was skipped
    FileSkipped { path: PathBuf, reason: String },
    /// The cache was rewritten with `total` records
    Checkpointed { total: usize },
    /// Cancellation was observed; no further batches are requested
    Cancelled,
}

/// Receives ingestion events
pub trait IngestObserver: Send + Sync {
    fn on_event(&self, event: &IngestEvent);
}

impl<F> IngestObserver for F
where
    F: Fn(&IngestEvent) + Send + Sync,
{
    fn on_event(&self, event: &IngestEvent) {
        self(event)
    }
}

/// Forwards every event to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl IngestObserver for LogObserver {
    fn on_event(&self, event: &IngestEvent) {
        match event {
            IngestEvent::CacheLoaded { records } => {
                info!("Loaded {} records from cache", records)
            }
            IngestEvent::IdsListed { listed, estimate } => match estimate {
                Some(total) => debug!("Listed {} ids (estimate {})", listed, total),
                None => debug!("Listed {} ids", listed),
            },
            IngestEvent::CacheFiltered { hits, misses } => {
                info!("{} already cached, {} new to fetch", hits, misses)
            }
            IngestEvent::BatchCompleted {
                index,
                succeeded,
                failed,
            } => info!(
                "Batch {} complete: {} fetched, {} failed",
                index + 1,
                succeeded,
                failed
            ),
            IngestEvent::RecordFailed { record_id, reason } => {
                warn!("Failed to fetch {}: {}", record_id, reason)
            }
            IngestEvent::FileSkipped { path, reason } => {
                warn!("Skipping archive {}: {}", path.display(), reason)
            }
            IngestEvent::Checkpointed { total } => debug!("Checkpointed {} records", total),
            IngestEvent::Cancelled => warn!("Ingestion cancelled; finishing in-flight work"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_observer() {
        let seen = Mutex::new(Vec::new());
        let observer = |event: &IngestEvent| seen.lock().unwrap().push(event.clone());
        observer.on_event(&IngestEvent::Checkpointed { total: 3 });
        observer.on_event(&IngestEvent::Cancelled);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![IngestEvent::Checkpointed { total: 3 }, IngestEvent::Cancelled]
        );
    }
}
