//! Paginated mail API integration
//!
//! This module provides:
//! - Wire types for the message listing and metadata endpoints
//! - The [`MessageApi`] seam the paginated adapter talks to
//! - A [`GmailClient`] implementing it over HTTP, including the batch endpoint

pub mod batch;
mod client;

pub use client::GmailClient;

use anyhow::Result;

use crate::models::RecordId;

/// Supplies OAuth bearer tokens
///
/// Acquiring and refreshing credentials happens outside this crate; the client
/// asks for a token before every request.
pub trait TokenProvider: Send + Sync {
    fn access_token(&self) -> Result<String>;
}

/// A fixed, already-issued access token
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenProvider for StaticToken {
    fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Remote operations the paginated adapter needs
///
/// Errors wrapping [`PermanentError`](crate::error::PermanentError) are never
/// retried; everything else is treated as transient.
pub trait MessageApi: Send + Sync {
    /// Confirm the credentials work before a run starts
    fn verify(&self) -> Result<()> {
        Ok(())
    }

    /// One page of identifiers matching `query`
    fn list_messages(
        &self,
        query: &str,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<api::ListMessagesResponse>;

    /// Metadata (From, Date, Subject) of a single message
    fn get_metadata(&self, id: &RecordId) -> Result<api::GmailMessage>;

    /// Metadata of several messages in one multiplexed request
    ///
    /// The outer error means the whole request failed. Otherwise there is one
    /// entry per requested identifier, in request order.
    fn batch_get_metadata(&self, ids: &[RecordId]) -> Result<Vec<Result<api::GmailMessage>>>;
}

/// API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Response from listing messages
    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        #[serde(default)]
        pub thread_id: Option<String>,
    }

    /// Message fetched with `format=metadata`
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        #[serde(default)]
        pub thread_id: Option<String>,
        #[serde(default)]
        pub internal_date: Option<String>,
        pub payload: Option<MessagePayload>,
    }

    impl GmailMessage {
        /// First header named `name` (case-insensitive)
        pub fn header(&self, name: &str) -> Option<&str> {
            self.payload
                .as_ref()?
                .headers
                .as_ref()?
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value.as_str())
        }
    }

    /// Message payload; only headers are requested
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePayload {
        pub headers: Option<Vec<Header>>,
        pub mime_type: Option<String>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Clone, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }
}

#[cfg(test)]
mod tests {
    use super::api::*;

    #[test]
    fn test_parse_metadata_message() {
        let json = r#"{
            "id": "18c2",
            "threadId": "18c2",
            "payload": {
                "mimeType": "text/plain",
                "headers": [
                    { "name": "From", "value": "Shop <deals@shop.com>" },
                    { "name": "Date", "value": "Sun, 1 Jun 2025 12:00:00 +0000" }
                ]
            }
        }"#;
        let message: GmailMessage = serde_json::from_str(json).unwrap();
        assert_eq!(message.header("from"), Some("Shop <deals@shop.com>"));
        assert_eq!(message.header("DATE"), Some("Sun, 1 Jun 2025 12:00:00 +0000"));
        assert_eq!(message.header("Subject"), None);
    }

    #[test]
    fn test_parse_empty_listing() {
        let list: ListMessagesResponse = serde_json::from_str(r#"{ "resultSizeEstimate": 0 }"#).unwrap();
        assert!(list.messages.is_none());
        assert!(list.next_page_token.is_none());
        assert_eq!(list.result_size_estimate, Some(0));
    }
}
