//! Local-Archive adapter (mbox files)
//!
//! Dates are not a query primitive here: every message in every archive is
//! parsed, and the window is applied to the parsed instant. Messages whose
//! date cannot be parsed cannot be placed in the window and are counted as
//! filtered. A file that cannot be opened or read is skipped and the remaining
//! files are still processed.

use log::{debug, info};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::mbox::MboxReader;
use super::{
    BatchStream, FetchContext, FetchedBatch, HeaderEncoding, RawRecord, RecordFailure,
    parse_header_block,
};
use crate::error::ConfigError;
use crate::ingest::IngestEvent;
use crate::models::{FetchWindow, RecordId};
use crate::normalize::parse_date;

/// Archive names produced by common mailbox exports
const ARCHIVE_PATTERNS: &[&str] = &[
    "*.mbox",
    "All mail*.mbox",
    "*All mail Including Spam and Trash.mbox",
];

/// Find the mbox archives at `path`
///
/// A file is used as is. A directory is scanned with the known export names,
/// then recursively for any `.mbox` file.
pub fn discover_archives(path: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::MissingPath(path.to_path_buf()));
    }
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let root = glob::Pattern::escape(&path.to_string_lossy());
    let mut found = BTreeSet::new();
    for pattern in ARCHIVE_PATTERNS {
        let Ok(paths) = glob::glob(&format!("{}/{}", root, pattern)) else {
            continue;
        };
        found.extend(paths.flatten().filter(|p| p.is_file()));
    }

    if found.is_empty() {
        found.extend(
            WalkDir::new(path)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|p| {
                    p.extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("mbox"))
                }),
        );
    }

    if found.is_empty() {
        return Err(ConfigError::NoArchives(path.to_path_buf()));
    }
    Ok(found.into_iter().collect())
}

/// Source reading one or more mbox archives
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    files: Vec<PathBuf>,
    batch_size: usize,
}

impl ArchiveSource {
    pub fn new(path: &Path, batch_size: usize) -> Result<Self, ConfigError> {
        let files = discover_archives(path)?;
        info!("Found {} archive file(s) under {}", files.len(), path.display());
        Ok(Self {
            files,
            batch_size: batch_size.max(1),
        })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn fetch_window<'a>(
        &'a self,
        window: FetchWindow,
        limit: Option<usize>,
        ctx: &FetchContext,
    ) -> BatchStream<'a> {
        Box::new(ArchiveBatches {
            files: self.files.iter(),
            current: None,
            window,
            remaining: limit,
            batch_size: self.batch_size,
            index: 0,
            ctx: ctx.clone(),
        })
    }
}

struct OpenArchive {
    name: String,
    path: PathBuf,
    reader: MboxReader<BufReader<File>>,
    ordinal: usize,
}

struct ArchiveBatches<'a> {
    files: std::slice::Iter<'a, PathBuf>,
    current: Option<OpenArchive>,
    window: FetchWindow,
    remaining: Option<usize>,
    batch_size: usize,
    index: usize,
    ctx: FetchContext,
}

impl ArchiveBatches<'_> {
    /// Open the next readable archive; `false` once every file is used
    fn open_next(&mut self) -> bool {
        for path in self.files.by_ref() {
            if self.ctx.is_cancelled() {
                return false;
            }
            match File::open(path) {
                Ok(file) => {
                    debug!("Scanning {}", path.display());
                    self.current = Some(OpenArchive {
                        name: path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_else(|| path.display().to_string()),
                        path: path.clone(),
                        reader: MboxReader::new(BufReader::new(file)),
                        ordinal: 0,
                    });
                    return true;
                }
                Err(e) => self.ctx.emit(IngestEvent::FileSkipped {
                    path: path.clone(),
                    reason: e.to_string(),
                }),
            }
        }
        false
    }

    fn take_message(&mut self, archive: &mut OpenArchive, header: &[u8], batch: &mut FetchedBatch) {
        archive.ordinal += 1;
        let fallback_id = || RecordId::new(format!("{}#{}", archive.name, archive.ordinal));

        let fields = match parse_header_block(header) {
            Ok(fields) => fields,
            Err(e) => {
                batch.failures.push(RecordFailure {
                    record_id: fallback_id(),
                    reason: format!("{:#}", e),
                });
                return;
            }
        };

        match parse_date(&fields.date) {
            Some(sent_at) if self.window.contains(sent_at) => {}
            _ => {
                batch.filtered += 1;
                return;
            }
        }

        let record_id = fields
            .message_id
            .map(RecordId::new)
            .unwrap_or_else(fallback_id);
        if self.ctx.is_known(&record_id) {
            self.ctx.add_cache_hits(1);
            return;
        }

        batch.records.push(RawRecord {
            record_id,
            from: fields.from,
            date: fields.date,
            subject: fields.subject,
            encoding: HeaderEncoding::Encoded,
        });
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
    }
}

impl Iterator for ArchiveBatches<'_> {
    type Item = anyhow::Result<FetchedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.ctx.is_cancelled() || self.remaining == Some(0) {
            return None;
        }

        let mut batch = FetchedBatch::new(self.index);
        while batch.records.len() < self.batch_size && self.remaining != Some(0) {
            if self.current.is_none() && !self.open_next() {
                break;
            }
            let Some(mut archive) = self.current.take() else {
                break;
            };

            match archive.reader.next_message() {
                Ok(Some(header)) => {
                    self.take_message(&mut archive, &header, &mut batch);
                    self.current = Some(archive);
                }
                Ok(None) => debug!("Finished {}", archive.path.display()),
                Err(e) => self.ctx.emit(IngestEvent::FileSkipped {
                    path: archive.path,
                    reason: e.to_string(),
                }),
            }
        }

        if batch.is_empty() {
            return None;
        }
        self.index += 1;
        Some(Ok(batch))
    }
}
