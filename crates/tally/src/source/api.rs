//! Paginated-API adapter
//!
//! Phase one lists identifiers for the window query, page by page, until the
//! cursor runs out or the limit is reached. Phase two fetches metadata in
//! multiplexed batches. Up to `governor.limit()` batches run at once; a batch
//! that fails as a whole, or a part that fails inside it, falls back to single
//! metadata requests under the detail retry policy.

use anyhow::Result;
use log::{debug, warn};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use super::{BatchStream, FetchContext, FetchedBatch, HeaderEncoding, RawRecord, RecordFailure};
use crate::config::IngestConfig;
use crate::error::is_permanent;
use crate::gmail::MessageApi;
use crate::gmail::api::GmailMessage;
use crate::governor::Governor;
use crate::ingest::{CancelToken, IngestEvent};
use crate::models::{FetchWindow, RecordId};
use crate::retry::RetryPolicy;

/// Source backed by a [`MessageApi`]
pub struct ApiSource {
    api: Arc<dyn MessageApi>,
    governor: Arc<Governor>,
    listing_retry: RetryPolicy,
    detail_retry: RetryPolicy,
    batch_size: usize,
    page_size: usize,
}

impl ApiSource {
    pub fn new(api: Arc<dyn MessageApi>, governor: Arc<Governor>, config: &IngestConfig) -> Self {
        Self {
            api,
            governor,
            listing_retry: RetryPolicy::from_settings(&config.listing_retry),
            detail_retry: RetryPolicy::from_settings(&config.detail_retry),
            batch_size: config.batch_size.max(1),
            page_size: config.effective_page_size(),
        }
    }

    /// Replace both retry policies (tests inject non-sleeping ones)
    pub fn with_retry(mut self, listing: RetryPolicy, detail: RetryPolicy) -> Self {
        self.listing_retry = listing;
        self.detail_retry = detail;
        self
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    pub fn preflight(&self) -> Result<()> {
        self.api.verify()
    }

    /// Phase one: every identifier matching the window, up to `limit`
    ///
    /// A page that still fails after retries ends the listing; the
    /// identifiers collected so far are kept.
    pub fn list_ids(&self, window: &FetchWindow, limit: Option<usize>, ctx: &FetchContext) -> Vec<RecordId> {
        let query = window.api_query();
        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        let mut page_token: Option<String> = None;

        loop {
            if ctx.is_cancelled() {
                break;
            }
            let remaining = limit.map(|max| max.saturating_sub(ids.len()));
            if remaining == Some(0) {
                break;
            }
            let page_size = remaining.map_or(self.page_size, |r| r.min(self.page_size));

            let page = match self.listing_retry.execute_until(ctx.cancel(), |_| {
                self.api
                    .list_messages(&query, page_size, page_token.as_deref())
            }) {
                Ok(page) => page,
                Err(e) => {
                    warn!("Listing stopped after {} ids: {:#}", ids.len(), e);
                    break;
                }
            };

            for message in page.messages.unwrap_or_default() {
                if seen.insert(message.id.clone()) {
                    ids.push(RecordId::new(message.id));
                }
            }
            ctx.emit(IngestEvent::IdsListed {
                listed: ids.len(),
                estimate: page.result_size_estimate,
            });

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        if let Some(max) = limit {
            ids.truncate(max);
        }
        ids
    }

    pub fn fetch_window<'a>(
        &'a self,
        window: FetchWindow,
        limit: Option<usize>,
        ctx: &FetchContext,
    ) -> Result<BatchStream<'a>> {
        let ids = self.list_ids(&window, limit, ctx);
        let pending = ctx.split_known(ids);

        let chunks: VecDeque<(usize, Vec<RecordId>)> = pending
            .chunks(self.batch_size)
            .map(<[RecordId]>::to_vec)
            .enumerate()
            .collect();
        debug!("{} batches to fetch", chunks.len());

        Ok(Box::new(ApiBatches {
            source: self,
            chunks,
            ready: VecDeque::new(),
            ctx: ctx.clone(),
        }))
    }

    /// Phase two for one batch; never fails as a whole
    fn fetch_batch(&self, index: usize, ids: Vec<RecordId>, cancel: &CancelToken) -> FetchedBatch {
        let mut batch = FetchedBatch::new(index);

        let batched: Vec<Option<Result<GmailMessage>>> = match self.api.batch_get_metadata(&ids) {
            Ok(results) if results.len() == ids.len() => results.into_iter().map(Some).collect(),
            Ok(results) => {
                warn!(
                    "Batch {} returned {} results for {} ids; fetching individually",
                    index + 1,
                    results.len(),
                    ids.len()
                );
                ids.iter().map(|_| None).collect()
            }
            Err(e) => {
                warn!("Batch {} failed ({:#}); fetching individually", index + 1, e);
                ids.iter().map(|_| None).collect()
            }
        };

        for (id, result) in ids.into_iter().zip(batched) {
            let message = match result {
                Some(Ok(message)) => Ok(message),
                Some(Err(e)) if is_permanent(&e) => Err(e),
                _ => self
                    .detail_retry
                    .execute_until(cancel, |_| self.api.get_metadata(&id)),
            };

            match message {
                Ok(message) => batch.records.push(raw_record(id, &message)),
                Err(e) => batch.failures.push(RecordFailure {
                    record_id: id,
                    reason: format!("{:#}", e),
                }),
            }
        }

        batch
    }
}

fn raw_record(record_id: RecordId, message: &GmailMessage) -> RawRecord {
    let header = |name: &str| message.header(name).unwrap_or_default().to_string();
    RawRecord {
        record_id,
        from: header("From"),
        date: header("Date"),
        subject: header("Subject"),
        encoding: HeaderEncoding::Decoded,
    }
}

/// Fetches batches in waves of `governor.limit()`, yielding them in order
struct ApiBatches<'a> {
    source: &'a ApiSource,
    chunks: VecDeque<(usize, Vec<RecordId>)>,
    ready: VecDeque<FetchedBatch>,
    ctx: FetchContext,
}

impl Iterator for ApiBatches<'_> {
    type Item = Result<FetchedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(batch) = self.ready.pop_front() {
            return Some(Ok(batch));
        }
        if self.chunks.is_empty() || self.ctx.is_cancelled() {
            return None;
        }

        let width = self.source.governor.limit().min(self.chunks.len());
        let wave: Vec<(usize, Vec<RecordId>)> = self.chunks.drain(..width).collect();
        let source = self.source;
        let cancel = self.ctx.cancel().clone();

        self.ready = source
            .governor
            .map(wave, |(index, ids)| source.fetch_batch(index, ids, &cancel))
            .into();
        self.ready.pop_front().map(Ok)
    }
}
