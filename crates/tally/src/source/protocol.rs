//! Bulk-Protocol adapter (IMAP-style mailbox sessions)
//!
//! Selects the most complete container, runs one window search, then fetches
//! the header fields of each chunk of UIDs in a single range fetch. A chunk
//! that fails, or comes back short, is completed with per-UID fetches under the
//! protocol retry policy. Chunks are fetched one after another on the single
//! session.

use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::{
    BatchStream, FetchContext, FetchedBatch, HeaderEncoding, RawRecord, RecordFailure,
    parse_header_block,
};
use crate::config::IngestConfig;
use crate::error::PermanentError;
use crate::ingest::{CancelToken, IngestEvent};
use crate::models::{FetchWindow, RecordId};
use crate::retry::RetryPolicy;

/// Fetch items requesting only the headers the engine needs
pub const HEADER_ITEMS: &str = "BODY.PEEK[HEADER.FIELDS (FROM DATE SUBJECT MESSAGE-ID)]";

/// Containers tried in order when none is configured
const PREFERRED_MAILBOXES: &[&str] = &[
    "[Gmail]/All Mail",
    "[Google Mail]/All Mail",
    "All Mail",
    "INBOX",
];

/// State of a selected mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxInfo {
    pub exists: u32,
    pub uid_validity: u32,
}

/// Header block returned for one UID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedHeaders {
    pub uid: u32,
    pub header: Vec<u8>,
}

/// An authenticated mailbox-protocol session
///
/// [`ImapSession`](super::ImapSession) talks to a real server; credentials
/// are acquired by the caller.
pub trait MailboxSession: Send {
    fn list_mailboxes(&mut self) -> Result<Vec<String>>;

    fn select(&mut self, mailbox: &str) -> Result<MailboxInfo>;

    /// `UID SEARCH` returning matching UIDs
    fn uid_search(&mut self, criteria: &str) -> Result<Vec<u32>>;

    /// `UID FETCH` of `items` for a UID set such as `1:3,7`
    fn uid_fetch(&mut self, uid_set: &str, items: &str) -> Result<Vec<FetchedHeaders>>;

    /// End the session on the server
    fn logout(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Source backed by a [`MailboxSession`]
pub struct ProtocolSource {
    session: Mutex<Box<dyn MailboxSession>>,
    mailbox: Option<String>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl ProtocolSource {
    pub fn new(session: Box<dyn MailboxSession>, config: &IngestConfig) -> Self {
        Self {
            session: Mutex::new(session),
            mailbox: config.mailbox.clone(),
            batch_size: config.batch_size.max(1),
            retry: RetryPolicy::from_settings(&config.protocol_retry),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Log out of the server once ingestion is over
    pub fn close(&self) -> Result<()> {
        self.session()?.logout()
    }

    fn session(&self) -> Result<std::sync::MutexGuard<'_, Box<dyn MailboxSession>>> {
        self.session
            .lock()
            .map_err(|_| anyhow!("Mailbox session lock poisoned"))
    }

    pub fn fetch_window<'a>(
        &'a self,
        window: FetchWindow,
        limit: Option<usize>,
        ctx: &FetchContext,
    ) -> Result<BatchStream<'a>> {
        let mut session = self.session()?;
        let cancel = ctx.cancel();

        let mailbox = match &self.mailbox {
            Some(mailbox) => mailbox.clone(),
            None => {
                let available = self
                    .retry
                    .execute_until(cancel, |_| session.list_mailboxes())
                    .context("Failed to list mailboxes")?;
                choose_mailbox(&available)
            }
        };

        let info = self
            .retry
            .execute_until(cancel, |_| session.select(&mailbox))
            .with_context(|| format!("Failed to select {}", mailbox))?;
        info!("Selected {} ({} messages)", mailbox, info.exists);

        let criteria = window.protocol_criteria();
        let mut uids = self
            .retry
            .execute_until(cancel, |_| session.uid_search(&criteria))
            .with_context(|| format!("Search '{}' failed", criteria))?;
        drop(session);

        uids.sort_unstable();
        uids.dedup();
        if let Some(max) = limit {
            // Keep the most recent messages
            let skip = uids.len().saturating_sub(max);
            uids.drain(..skip);
        }
        ctx.emit(IngestEvent::IdsListed {
            listed: uids.len(),
            estimate: Some(info.exists),
        });

        let ids: Vec<RecordId> = uids
            .iter()
            .map(|uid| record_id(&mailbox, info.uid_validity, *uid))
            .collect();
        let by_id: HashMap<RecordId, u32> = ids.iter().cloned().zip(uids.iter().copied()).collect();
        let pending: Vec<(u32, RecordId)> = ctx
            .split_known(ids)
            .into_iter()
            .filter_map(|id| by_id.get(&id).map(|uid| (*uid, id)))
            .collect();

        let chunks: VecDeque<(usize, Vec<(u32, RecordId)>)> = pending
            .chunks(self.batch_size)
            .map(<[(u32, RecordId)]>::to_vec)
            .enumerate()
            .collect();
        debug!("{} chunks to fetch from {}", chunks.len(), mailbox);

        Ok(Box::new(ProtocolChunks {
            source: self,
            chunks,
            ctx: ctx.clone(),
        }))
    }

    fn fetch_chunk(
        &self,
        session: &mut dyn MailboxSession,
        index: usize,
        chunk: Vec<(u32, RecordId)>,
        cancel: &CancelToken,
    ) -> FetchedBatch {
        let mut batch = FetchedBatch::new(index);
        let uids: Vec<u32> = chunk.iter().map(|(uid, _)| *uid).collect();
        let set = uid_set(&uids);

        let mut headers: HashMap<u32, Vec<u8>> = match session.uid_fetch(&set, HEADER_ITEMS) {
            Ok(fetched) => fetched.into_iter().map(|f| (f.uid, f.header)).collect(),
            Err(e) => {
                warn!("Chunk {} failed ({:#}); fetching individually", index + 1, e);
                HashMap::new()
            }
        };

        for (uid, record_id) in chunk {
            let header = match headers.remove(&uid) {
                Some(header) => Ok(header),
                None => self.retry.execute_until(cancel, |_| fetch_one(&mut *session, uid)),
            };

            match header.and_then(|h| parse_header_block(&h)) {
                Ok(fields) => batch.records.push(RawRecord {
                    record_id,
                    from: fields.from,
                    date: fields.date,
                    subject: fields.subject,
                    encoding: HeaderEncoding::Encoded,
                }),
                Err(e) => batch.failures.push(RecordFailure {
                    record_id,
                    reason: format!("{:#}", e),
                }),
            }
        }

        batch
    }
}

fn fetch_one(session: &mut dyn MailboxSession, uid: u32) -> Result<Vec<u8>> {
    session
        .uid_fetch(&uid.to_string(), HEADER_ITEMS)?
        .into_iter()
        .find(|f| f.uid == uid)
        .map(|f| f.header)
        .ok_or_else(|| PermanentError::new(format!("UID {} no longer exists", uid)).into())
}

fn record_id(mailbox: &str, uid_validity: u32, uid: u32) -> RecordId {
    RecordId::new(format!("{}/{}/{}", mailbox, uid_validity, uid))
}

/// Pick the most complete container the server offers
pub fn choose_mailbox(available: &[String]) -> String {
    PREFERRED_MAILBOXES
        .iter()
        .find_map(|preferred| {
            available
                .iter()
                .find(|name| name.eq_ignore_ascii_case(preferred))
                .cloned()
        })
        .unwrap_or_else(|| "INBOX".to_string())
}

/// Compress sorted UIDs into a UID set (`1:3,5,7:9`)
pub fn uid_set(uids: &[u32]) -> String {
    let mut parts = Vec::new();
    let mut iter = uids.iter().copied().peekable();

    while let Some(start) = iter.next() {
        let mut end = start;
        while let Some(next) = end.checked_add(1)
            && iter.peek() == Some(&next)
        {
            end = next;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}:{}", start, end));
        }
    }

    parts.join(",")
}

struct ProtocolChunks<'a> {
    source: &'a ProtocolSource,
    chunks: VecDeque<(usize, Vec<(u32, RecordId)>)>,
    ctx: FetchContext,
}

impl Iterator for ProtocolChunks<'_> {
    type Item = Result<FetchedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.ctx.is_cancelled() {
            return None;
        }
        let (index, chunk) = self.chunks.pop_front()?;

        let mut session = match self.source.session() {
            Ok(session) => session,
            Err(e) => return Some(Err(e)),
        };
        Some(Ok(self.source.fetch_chunk(
            session.as_mut(),
            index,
            chunk,
            self.ctx.cancel(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Sleeper;
    use chrono::NaiveDate;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NoSleep;

    impl Sleeper for NoSleep {
        fn sleep(&self, _duration: Duration) {}
    }

    /// Session over messages keyed by UID, each with a send date
    struct FakeSession {
        mailboxes: Vec<String>,
        messages: Vec<(u32, NaiveDate)>,
        fail_ranges: bool,
        selected: Arc<Mutex<Option<String>>>,
        fetch_calls: Arc<AtomicUsize>,
    }

    impl FakeSession {
        fn new(messages: Vec<(u32, NaiveDate)>) -> Self {
            Self {
                mailboxes: vec!["INBOX".to_string(), "[Gmail]/All Mail".to_string()],
                messages,
                fail_ranges: false,
                selected: Arc::new(Mutex::new(None)),
                fetch_calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn header(uid: u32, date: NaiveDate) -> Vec<u8> {
            format!(
                "From: User {uid} <user{uid}@x.com>\r\nDate: {} 12:00:00 +0000\r\nSubject: s{uid}\r\n",
                date.format("%-d %b %Y")
            )
            .into_bytes()
        }
    }

    fn parse_criteria(criteria: &str) -> (NaiveDate, NaiveDate) {
        let parts: Vec<&str> = criteria.split_whitespace().collect();
        let date = |s: &str| NaiveDate::parse_from_str(s, "%d-%b-%Y").unwrap();
        assert_eq!(parts[0], "SINCE");
        assert_eq!(parts[2], "BEFORE");
        (date(parts[1]), date(parts[3]))
    }

    impl MailboxSession for FakeSession {
        fn list_mailboxes(&mut self) -> Result<Vec<String>> {
            Ok(self.mailboxes.clone())
        }

        fn select(&mut self, mailbox: &str) -> Result<MailboxInfo> {
            *self.selected.lock().unwrap() = Some(mailbox.to_string());
            Ok(MailboxInfo {
                exists: self.messages.len() as u32,
                uid_validity: 7,
            })
        }

        fn uid_search(&mut self, criteria: &str) -> Result<Vec<u32>> {
            let (since, before) = parse_criteria(criteria);
            Ok(self
                .messages
                .iter()
                .filter(|(_, date)| since <= *date && *date < before)
                .map(|(uid, _)| *uid)
                .collect())
        }

        fn uid_fetch(&mut self, uid_set: &str, items: &str) -> Result<Vec<FetchedHeaders>> {
            assert_eq!(items, HEADER_ITEMS);
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            let single = !uid_set.contains([':', ',']);
            if self.fail_ranges && !single {
                anyhow::bail!("BAD range fetch");
            }
            let wanted: Vec<u32> = uid_set
                .split(',')
                .flat_map(|part| match part.split_once(':') {
                    Some((a, b)) => (a.parse::<u32>().unwrap()..=b.parse().unwrap()).collect::<Vec<_>>(),
                    None => vec![part.parse().unwrap()],
                })
                .collect();
            Ok(self
                .messages
                .iter()
                .filter(|(uid, _)| wanted.contains(uid))
                .map(|(uid, date)| FetchedHeaders {
                    uid: *uid,
                    header: Self::header(*uid, *date),
                })
                .collect())
        }
    }

    fn june(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn source(session: FakeSession, batch_size: usize) -> ProtocolSource {
        let config = IngestConfig {
            batch_size,
            ..IngestConfig::default()
        };
        ProtocolSource::new(Box::new(session), &config)
            .with_retry(RetryPolicy::new(3, Duration::from_secs(1)).with_sleeper(Arc::new(NoSleep)))
    }

    fn context() -> FetchContext {
        FetchContext::new(Default::default(), CancelToken::new(), Arc::new(|_: &IngestEvent| {}))
    }

    fn fetch(source: &ProtocolSource, window: FetchWindow, limit: Option<usize>) -> Vec<FetchedBatch> {
        source
            .fetch_window(window, limit, &context())
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_uid_set_compression() {
        assert_eq!(uid_set(&[1, 2, 3, 5, 7, 8, 9]), "1:3,5,7:9");
        assert_eq!(uid_set(&[4]), "4");
        assert_eq!(uid_set(&[]), "");
    }

    #[test]
    fn test_uid_set_at_max_uid() {
        assert_eq!(uid_set(&[u32::MAX - 1, u32::MAX]), format!("{}:{}", u32::MAX - 1, u32::MAX));
        assert_eq!(uid_set(&[3, u32::MAX]), format!("3,{}", u32::MAX));
    }

    #[test]
    fn test_choose_mailbox_prefers_all_mail() {
        let available = vec!["INBOX".to_string(), "[Gmail]/All Mail".to_string()];
        assert_eq!(choose_mailbox(&available), "[Gmail]/All Mail");
        assert_eq!(choose_mailbox(&["Sent".to_string()]), "INBOX");
    }

    #[test]
    fn test_single_day_window_is_inclusive() {
        let session = FakeSession::new(vec![(1, june(1)), (2, june(2)), (3, june(1))]);
        let selected = session.selected.clone();
        let source = source(session, 100);
        let window = FetchWindow::parse("2025/06/01", "2025/06/01").unwrap();
        let batches = fetch(&source, window, None);

        assert_eq!(selected.lock().unwrap().as_deref(), Some("[Gmail]/All Mail"));
        let ids: Vec<&str> = batches[0].records.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, vec!["[Gmail]/All Mail/7/1", "[Gmail]/All Mail/7/3"]);
        assert_eq!(batches[0].records[0].encoding, HeaderEncoding::Encoded);
    }

    #[test]
    fn test_chunks_and_limit_keep_most_recent() {
        let messages = (1..=25).map(|uid| (uid, june(10))).collect();
        let source = source(FakeSession::new(messages), 10);
        let window = FetchWindow::parse("2025/06/01", "2025/06/30").unwrap();
        let batches = fetch(&source, window, Some(15));

        let sizes: Vec<usize> = batches.iter().map(|b| b.records.len()).collect();
        assert_eq!(sizes, vec![10, 5]);
        assert_eq!(batches[0].records[0].record_id.as_str(), "[Gmail]/All Mail/7/11");
    }

    #[test]
    fn test_failed_chunk_falls_back_per_uid() {
        let mut session = FakeSession::new((1..=4).map(|uid| (uid, june(3))).collect());
        session.fail_ranges = true;
        let calls = session.fetch_calls.clone();
        let source = source(session, 100);
        let window = FetchWindow::parse("2025/06/01", "2025/06/30").unwrap();
        let batches = fetch(&source, window, None);

        assert_eq!(batches[0].records.len(), 4);
        assert!(batches[0].failures.is_empty());
        // one failed range fetch, then one fetch per UID
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_close_logs_out() {
        struct Closing(Arc<AtomicUsize>);

        impl MailboxSession for Closing {
            fn list_mailboxes(&mut self) -> Result<Vec<String>> {
                Ok(Vec::new())
            }
            fn select(&mut self, _mailbox: &str) -> Result<MailboxInfo> {
                anyhow::bail!("not connected")
            }
            fn uid_search(&mut self, _criteria: &str) -> Result<Vec<u32>> {
                Ok(Vec::new())
            }
            fn uid_fetch(&mut self, _uid_set: &str, _items: &str) -> Result<Vec<FetchedHeaders>> {
                Ok(Vec::new())
            }
            fn logout(&mut self) -> Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let logouts = Arc::new(AtomicUsize::new(0));
        let source = ProtocolSource::new(Box::new(Closing(logouts.clone())), &IngestConfig::default());
        source.close().unwrap();
        assert_eq!(logouts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_configured_mailbox_overrides_choice() {
        let session = FakeSession::new(vec![(1, june(1))]);
        let selected = session.selected.clone();
        let config = IngestConfig {
            mailbox: Some("Archive".to_string()),
            ..IngestConfig::default()
        };
        let source = ProtocolSource::new(Box::new(session), &config);
        let window = FetchWindow::parse("2025/06/01", "2025/06/01").unwrap();
        fetch(&source, window, None);
        assert_eq!(selected.lock().unwrap().as_deref(), Some("Archive"));
    }
}
