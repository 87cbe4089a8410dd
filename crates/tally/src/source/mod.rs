//! Source adapters
//!
//! A [`Source`] yields raw message records for a [`FetchWindow`] as a lazy
//! sequence of batches. Three transports are supported and selected at
//! startup:
//!
//! - [`SourceKind::PaginatedApi`]: list identifiers page by page, then fetch
//!   metadata in multiplexed batches under the [`Governor`]
//! - [`SourceKind::BulkProtocol`]: one window search on a mailbox, then header
//!   range-fetches per chunk of UIDs, over an [`ImapSession`] or any other
//!   [`MailboxSession`]
//! - [`SourceKind::LocalArchive`]: sequential scan of mbox files with the
//!   window applied after each date is parsed
//!
//! Identifiers already present in the cache are skipped before any fetch.

mod api;
mod archive;
mod imap;
pub mod mbox;
mod protocol;

pub use api::ApiSource;
pub use archive::{ArchiveSource, discover_archives};
pub use imap::{ImapConnection, ImapCredentials, ImapSession, TlsStream};
pub use protocol::{
    FetchedHeaders, HEADER_ITEMS, MailboxInfo, MailboxSession, ProtocolSource, choose_mailbox, uid_set,
};

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::IngestConfig;
use crate::error::ConfigError;
use crate::gmail::MessageApi;
use crate::governor::Governor;
use crate::ingest::{CancelToken, IngestEvent, IngestObserver};
use crate::models::{FetchWindow, RecordId};

/// Whether a record's headers still carry RFC 2047 encoded words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderEncoding {
    /// Already decoded by the transport
    Decoded,
    /// Raw header text; decode before extracting the sender
    Encoded,
}

/// Header fields of one message as delivered by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub record_id: RecordId,
    pub from: String,
    pub date: String,
    pub subject: String,
    pub encoding: HeaderEncoding,
}

/// A record that could not be fetched or parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub record_id: RecordId,
    pub reason: String,
}

/// One completed batch or chunk
#[derive(Debug, Clone, Default)]
pub struct FetchedBatch {
    /// Position of the batch in this run, from zero
    pub index: usize,
    pub records: Vec<RawRecord>,
    pub failures: Vec<RecordFailure>,
    /// Records dropped by an adapter-side window filter
    pub filtered: usize,
}

impl FetchedBatch {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.failures.is_empty() && self.filtered == 0
    }
}

/// Lazy sequence of fetched batches
pub type BatchStream<'a> = Box<dyn Iterator<Item = Result<FetchedBatch>> + 'a>;

/// Per-run state shared with an adapter while it fetches
#[derive(Clone)]
pub struct FetchContext {
    known: Arc<HashSet<RecordId>>,
    cancel: CancelToken,
    observer: Arc<dyn IngestObserver>,
    cache_hits: Arc<AtomicUsize>,
}

impl FetchContext {
    pub fn new(
        known: HashSet<RecordId>,
        cancel: CancelToken,
        observer: Arc<dyn IngestObserver>,
    ) -> Self {
        Self {
            known: Arc::new(known),
            cancel,
            observer,
            cache_hits: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Whether `id` is already cached
    pub fn is_known(&self, id: &RecordId) -> bool {
        self.known.contains(id)
    }

    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn emit(&self, event: IngestEvent) {
        self.observer.on_event(&event);
    }

    pub fn add_cache_hits(&self, hits: usize) {
        self.cache_hits.fetch_add(hits, Ordering::Relaxed);
    }

    /// Identifiers skipped so far because they were already cached
    pub fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Drop cached identifiers, reporting hits and misses
    pub(crate) fn split_known(&self, ids: Vec<RecordId>) -> Vec<RecordId> {
        let listed = ids.len();
        let pending: Vec<RecordId> = ids.into_iter().filter(|id| !self.is_known(id)).collect();
        let hits = listed - pending.len();
        self.add_cache_hits(hits);
        self.emit(IngestEvent::CacheFiltered {
            hits,
            misses: pending.len(),
        });
        pending
    }
}

impl fmt::Debug for FetchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchContext")
            .field("known", &self.known.len())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Transport selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    PaginatedApi,
    BulkProtocol,
    LocalArchive,
}

impl SourceKind {
    /// Whether the transport filters by window server-side
    pub fn is_remote(self) -> bool {
        !matches!(self, SourceKind::LocalArchive)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::PaginatedApi => "paginated-api",
            SourceKind::BulkProtocol => "bulk-protocol",
            SourceKind::LocalArchive => "local-archive",
        })
    }
}

/// A configured transport
pub enum Source {
    PaginatedApi(ApiSource),
    BulkProtocol(ProtocolSource),
    LocalArchive(ArchiveSource),
}

impl Source {
    /// Paginated API source with a governor sized to `config.concurrency`
    pub fn paginated_api(api: Arc<dyn MessageApi>, config: &IngestConfig) -> Result<Self> {
        let governor = Governor::new(config.concurrency)?;
        Ok(Source::PaginatedApi(ApiSource::new(
            api,
            Arc::new(governor),
            config,
        )))
    }

    /// Bulk-protocol source over an authenticated session
    pub fn bulk_protocol(session: Box<dyn MailboxSession>, config: &IngestConfig) -> Self {
        Source::BulkProtocol(ProtocolSource::new(session, config))
    }

    /// Local archive source; fails when no archive can be found
    pub fn local_archive(path: impl AsRef<Path>, config: &IngestConfig) -> Result<Self, ConfigError> {
        Ok(Source::LocalArchive(ArchiveSource::new(
            path.as_ref(),
            config.batch_size,
        )?))
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Source::PaginatedApi(_) => SourceKind::PaginatedApi,
            Source::BulkProtocol(_) => SourceKind::BulkProtocol,
            Source::LocalArchive(_) => SourceKind::LocalArchive,
        }
    }

    /// Checks that must pass before any fetching starts
    pub fn preflight(&self) -> Result<()> {
        match self {
            Source::PaginatedApi(source) => source.preflight(),
            Source::BulkProtocol(_) | Source::LocalArchive(_) => Ok(()),
        }
    }

    /// Release the transport once ingestion is over
    pub fn close(&self) -> Result<()> {
        match self {
            Source::BulkProtocol(source) => source.close(),
            Source::PaginatedApi(_) | Source::LocalArchive(_) => Ok(()),
        }
    }

    /// Fetch records dated inside `window`, at most `limit` of them
    pub fn fetch_window<'a>(
        &'a self,
        window: FetchWindow,
        limit: Option<usize>,
        ctx: &FetchContext,
    ) -> Result<BatchStream<'a>> {
        match self {
            Source::PaginatedApi(source) => source.fetch_window(window, limit, ctx),
            Source::BulkProtocol(source) => source.fetch_window(window, limit, ctx),
            Source::LocalArchive(source) => Ok(source.fetch_window(window, limit, ctx)),
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Source").field(&self.kind()).finish()
    }
}

/// Header fields read from a raw RFC 5322 header block
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct HeaderFields {
    pub from: String,
    pub date: String,
    pub subject: String,
    pub message_id: Option<String>,
}

/// Read From, Date, Subject and Message-ID without decoding encoded words
pub(crate) fn parse_header_block(block: &[u8]) -> Result<HeaderFields> {
    let (headers, _) = mailparse::parse_headers(block).context("Malformed header block")?;

    let raw = |name: &str| -> Option<String> {
        headers
            .iter()
            .find(|h| h.get_key().eq_ignore_ascii_case(name))
            .map(|h| unfold(&String::from_utf8_lossy(h.get_value_raw())))
    };

    Ok(HeaderFields {
        from: raw("From").unwrap_or_default(),
        date: raw("Date").unwrap_or_default(),
        subject: raw("Subject").unwrap_or_default(),
        message_id: raw("Message-ID").filter(|id| !id.is_empty()),
    })
}

/// Join folded header lines with single spaces
fn unfold(value: &str) -> String {
    value
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
