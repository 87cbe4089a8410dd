//! Ingestion run
//!
//! One run loads the cache, streams batches from the source, normalizes and
//! merges each batch, and rewrites the cache every `checkpoint_interval`
//! batches plus once at the end. Batches are processed one at a time on the
//! calling thread, so checkpoint N always holds batches 0..=N.

use anyhow::{Context, Result};
use log::info;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use super::{CancelToken, IngestEvent, IngestObserver, LogObserver};
use crate::config::IngestConfig;
use crate::models::{Email, FetchWindow, RecordId, SenderStats};
use crate::normalize::normalize_record;
use crate::report::aggregate;
use crate::source::{FetchContext, Source};
use crate::storage::{RecordCache, merge};

/// Parameters of one ingestion run
#[derive(Clone)]
pub struct IngestOptions {
    pub window: FetchWindow,
    /// Cap on records taken from the transport; `None` is unbounded
    pub limit: Option<usize>,
    /// Completed batches between cache checkpoints
    pub checkpoint_interval: usize,
    /// Drop remote records whose parsed date falls outside the window
    pub strict_window: bool,
    pub subject_max_chars: Option<usize>,
    pub cancel: CancelToken,
    pub observer: Arc<dyn IngestObserver>,
}

impl IngestOptions {
    /// Options with default settings, logging events
    pub fn new(window: FetchWindow) -> Self {
        Self::from_config(window, &IngestConfig::default())
    }

    pub fn from_config(window: FetchWindow, config: &IngestConfig) -> Self {
        Self {
            window,
            limit: None,
            checkpoint_interval: config.checkpoint_interval.max(1),
            strict_window: config.strict_window,
            subject_max_chars: config.subject_max_chars,
            cancel: CancelToken::new(),
            observer: Arc::new(LogObserver),
        }
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn IngestObserver>) -> Self {
        self.observer = observer;
        self
    }

    fn emit(&self, event: IngestEvent) {
        self.observer.on_event(&event);
    }
}

impl fmt::Debug for IngestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestOptions")
            .field("window", &self.window)
            .field("limit", &self.limit)
            .field("checkpoint_interval", &self.checkpoint_interval)
            .field("strict_window", &self.strict_window)
            .field("subject_max_chars", &self.subject_max_chars)
            .finish_non_exhaustive()
    }
}

/// Record counts of fetch attempts in this run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestTally {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Outcome of an ingestion run
#[derive(Debug, Default, Clone)]
pub struct IngestReport {
    /// Cached and newly ingested records, in ingestion order
    pub emails: Vec<Email>,
    pub tally: IngestTally,
    /// Records restored from the cache at start
    pub restored: usize,
    /// Identifiers skipped because they were already cached
    pub cache_hits: usize,
    /// Records added to the cache by this run
    pub added: usize,
    /// Records outside the window
    pub filtered: usize,
    /// Fetched records whose identifier was already present
    pub duplicates: usize,
    pub batches: usize,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl IngestReport {
    /// Fetch throughput of this run
    pub fn records_per_minute(&self) -> f64 {
        let minutes = self.duration_ms.max(1) as f64 / 60_000.0;
        self.tally.succeeded as f64 / minutes
    }

    /// Sender statistics over every record
    pub fn senders(&self) -> Vec<SenderStats> {
        aggregate(&self.emails)
    }
}

/// Run one ingestion of `options.window` from `source` into `cache`
///
/// Configuration and credential problems surface before anything is fetched.
/// Per-record fetch failures only show up in the tally. A failed checkpoint
/// write ends the run with an error; the cache then holds the last completed
/// checkpoint.
pub fn ingest(source: &Source, cache: &dyn RecordCache, options: &IngestOptions) -> Result<IngestReport> {
    let start = Instant::now();
    source
        .preflight()
        .with_context(|| format!("{} source is not usable", source.kind()))?;

    let mut report = IngestReport {
        emails: cache.load(),
        ..IngestReport::default()
    };
    report.restored = report.emails.len();
    options.emit(IngestEvent::CacheLoaded {
        records: report.restored,
    });

    let mut known: HashSet<RecordId> = report.emails.iter().map(|e| e.record_id.clone()).collect();
    let ctx = FetchContext::new(known.clone(), options.cancel.clone(), options.observer.clone());
    let post_filter = options.strict_window && source.kind().is_remote();
    let interval = options.checkpoint_interval.max(1);
    let mut since_checkpoint = 0;

    for batch in source.fetch_window(options.window, options.limit, &ctx)? {
        let batch = batch?;
        let succeeded = batch.records.len();
        let failed = batch.failures.len();

        report.batches += 1;
        report.tally.attempted += succeeded + failed;
        report.tally.succeeded += succeeded;
        report.tally.failed += failed;
        report.filtered += batch.filtered;

        for failure in batch.failures {
            options.emit(IngestEvent::RecordFailed {
                record_id: failure.record_id,
                reason: failure.reason,
            });
        }

        let mut normalized = Vec::with_capacity(succeeded);
        for raw in batch.records {
            let email = normalize_record(raw, options.subject_max_chars);
            if post_filter && email.sent_at.is_some_and(|t| !options.window.contains(t)) {
                report.filtered += 1;
                continue;
            }
            normalized.push(email);
        }

        let fetched = normalized.len();
        let added = merge(&known, normalized);
        report.duplicates += fetched - added.len();
        report.added += added.len();
        known.extend(added.iter().map(|e| e.record_id.clone()));
        report.emails.extend(added);

        since_checkpoint += 1;
        if since_checkpoint >= interval {
            checkpoint(cache, &report.emails, options)?;
            since_checkpoint = 0;
        }

        options.emit(IngestEvent::BatchCompleted {
            index: batch.index,
            succeeded,
            failed,
        });
    }

    if options.cancel.is_cancelled() {
        report.cancelled = true;
        options.emit(IngestEvent::Cancelled);
    }
    if since_checkpoint > 0 || report.batches == 0 {
        checkpoint(cache, &report.emails, options)?;
    }

    report.cache_hits = ctx.cache_hits();
    report.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Ingestion {}: {} attempted, {} succeeded, {} failed, {} added, {} total in {} ms",
        if report.cancelled { "cancelled" } else { "complete" },
        report.tally.attempted,
        report.tally.succeeded,
        report.tally.failed,
        report.added,
        report.emails.len(),
        report.duration_ms
    );
    Ok(report)
}

fn checkpoint(cache: &dyn RecordCache, emails: &[Email], options: &IngestOptions) -> Result<()> {
    cache
        .checkpoint(emails)
        .context("Failed to checkpoint cache")?;
    options.emit(IngestEvent::Checkpointed {
        total: emails.len(),
    });
    Ok(())
}
