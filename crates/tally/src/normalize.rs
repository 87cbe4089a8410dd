//! Header normalization
//!
//! Turns a raw `From` header and a raw `Date` header into the canonical
//! (address, display name, UTC instant) triple, and a transport record into an
//! [`Email`]. Nothing in here fails: unparseable input yields empty fields or
//! an absent instant.

use chrono::{DateTime, NaiveDateTime};

use crate::models::Email;
use crate::source::{HeaderEncoding, RawRecord};

/// Normalized sender and send time of one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedHeader {
    /// Lower-cased address
    pub address: String,
    pub display_name: String,
    /// UTC wall-clock instant, or `None` when the date did not parse
    pub sent_at: Option<NaiveDateTime>,
}

/// Normalize a `From` header and a `Date` header
pub fn normalize(from_header: &str, date_header: &str) -> NormalizedHeader {
    NormalizedHeader {
        address: extract_address(from_header),
        display_name: extract_display_name(from_header),
        sent_at: parse_date(date_header),
    }
}

/// Convert a transport record into an [`Email`]
///
/// Headers that arrive undecoded (archive and mailbox-protocol records) have
/// their encoded words decoded before the sender is extracted.
pub fn normalize_record(raw: RawRecord, subject_max_chars: Option<usize>) -> Email {
    let (from, subject) = match raw.encoding {
        HeaderEncoding::Decoded => (raw.from, raw.subject),
        HeaderEncoding::Encoded => (
            decode_encoded_words(&raw.from),
            decode_encoded_words(&raw.subject),
        ),
    };

    let header = normalize(&from, &raw.date);
    let subject = subject.trim();

    Email {
        record_id: raw.record_id,
        sender_address: header.address,
        sender_display_name: header.display_name,
        subject: match subject_max_chars {
            Some(max) => truncate_chars(subject, max),
            None => subject.to_string(),
        },
        raw_date: raw.date,
        sent_at: header.sent_at,
    }
}

/// Extract the lower-cased address from a `From` header
///
/// Uses the text between the first `<` and the following `>` when present,
/// otherwise the whole trimmed header.
pub fn extract_address(from_header: &str) -> String {
    let header = from_header.trim();
    let address = match angle_bracketed(header) {
        Some(inner) => inner.trim(),
        None => header,
    };
    address.to_lowercase()
}

/// Extract a display name from a `From` header
///
/// Takes the text before `<` without surrounding quotes. Falls back to the
/// local part of the address, then to the raw header.
pub fn extract_display_name(from_header: &str) -> String {
    let header = from_header.trim();

    if let Some(angle) = header.find('<') {
        let name = header[..angle]
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }

    let address = match angle_bracketed(header) {
        Some(inner) => inner.trim(),
        None => header,
    };
    match address.split_once('@') {
        Some((local, _)) => local.to_string(),
        None => header.to_string(),
    }
}

/// Parse an RFC 5322 date into a timezone-naive UTC instant
///
/// Offsets are applied and then dropped. Trailing comments such as `(UTC)`
/// are ignored. Dates that are not strictly RFC 5322 are tried against a few
/// formats seen in real archives; zone-less ones are read as UTC.
pub fn parse_date(date_header: &str) -> Option<NaiveDateTime> {
    let date = strip_comments(date_header);
    let date = date.split_whitespace().collect::<Vec<_>>().join(" ");
    if date.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc2822(&date) {
        return Some(parsed.naive_utc());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&date) {
        return Some(parsed.naive_utc());
    }
    for format in OFFSET_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(&date, format) {
            return Some(parsed.naive_utc());
        }
    }

    let naive = strip_utc_suffix(&date);
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(naive, format).ok())
}

/// Non-RFC 5322 layouts carrying a numeric offset
const OFFSET_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S%.f %z",
    "%d %b %Y %H:%M %z",
    "%a %b %e %H:%M:%S %Y %z",
    "%a %b %e %H:%M:%S %z %Y",
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%dT%H:%M:%S%z",
];

/// Layouts without an offset, read as UTC
const NAIVE_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M:%S",
    "%a %b %e %H:%M:%S %Y",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

fn strip_utc_suffix(date: &str) -> &str {
    ["UTC", "GMT", "UT", "Z"]
        .iter()
        .find_map(|zone| date.strip_suffix(zone))
        .map(str::trim_end)
        .unwrap_or(date)
}

/// Decode RFC 2047 encoded words (`=?charset?Q?...?=`)
///
/// Returns the input unchanged when it holds no encoded words or cannot be
/// decoded.
pub fn decode_encoded_words(value: &str) -> String {
    if !value.contains("=?") {
        return value.to_string();
    }
    // mailparse decodes encoded words while reading a header value
    let synthetic = format!("X: {}", value);
    match mailparse::parse_header(synthetic.as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(_) => value.to_string(),
    }
}

fn angle_bracketed(header: &str) -> Option<&str> {
    let open = header.find('<')?;
    let close = header[open + 1..].find('>')?;
    Some(&header[open + 1..open + 1 + close])
}

fn strip_comments(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut depth = 0usize;
    for c in value.chars() {
        match c {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
