//! Email model: the canonical per-message metadata record

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Opaque, transport-stable identifier for one message
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for RecordId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Header-level metadata for one message
///
/// `sent_at` is a UTC wall-clock instant without an offset. When the date
/// header could not be parsed it is `None`: the record still counts toward
/// ingestion totals but is left out of sender statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    #[serde(alias = "message_id")]
    pub record_id: RecordId,
    /// Lower-cased sender address (empty when the header had none)
    #[serde(alias = "sender")]
    pub sender_address: String,
    #[serde(default, alias = "sender_name")]
    pub sender_display_name: String,
    #[serde(default)]
    pub subject: String,
    /// Date header as received, kept for diagnostics
    #[serde(default, alias = "date")]
    pub raw_date: String,
    #[serde(default, alias = "timestamp", with = "iso_naive")]
    pub sent_at: Option<NaiveDateTime>,
}

impl Email {
    /// Whether this record can take part in sender statistics
    pub fn is_aggregatable(&self) -> bool {
        !self.sender_address.is_empty() && self.sent_at.is_some()
    }
}

/// ISO-8601 (de)serialization for timezone-naive UTC instants
///
/// Instants are written with a `Z` suffix. Reading accepts `Z`, explicit
/// offsets (converted to UTC) and bare naive timestamps with either a `T` or a
/// space separator. A value that matches none of these loads as `None` rather
/// than failing the whole record.
pub mod iso_naive {
    use chrono::{DateTime, NaiveDateTime};
    use serde::{Deserialize, Deserializer, Serializer};

    const WRITE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";
    const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    pub fn format(instant: &NaiveDateTime) -> String {
        instant.format(WRITE_FORMAT).to_string()
    }

    pub fn parse(s: &str) -> Option<NaiveDateTime> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.naive_utc());
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    }

    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(instant) => serializer.serialize_str(&format(instant)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse))
    }
}
