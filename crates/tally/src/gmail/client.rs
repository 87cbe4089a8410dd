//! HTTP client for the paginated mail API
//!
//! Uses synchronous HTTP (ureq) so it runs unchanged on the governor's worker
//! threads. Status codes that cannot succeed on retry are mapped to
//! [`PermanentError`]; everything else stays a plain transient error.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::api::{GmailMessage, ListMessagesResponse};
use super::{MessageApi, TokenProvider, batch};
use crate::error::{ConfigError, PermanentError};
use crate::models::RecordId;

/// Client for the message listing, metadata and batch endpoints
pub struct GmailClient {
    tokens: Arc<dyn TokenProvider>,
    agent: ureq::Agent,
    base_url: String,
    batch_url: String,
}

impl GmailClient {
    /// API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Batch endpoint
    const BATCH_URL: &'static str = "https://gmail.googleapis.com/batch/gmail/v1";

    /// Path prefix of requests embedded in a batch
    const BATCH_PATH: &'static str = "/gmail/v1";

    /// Headers requested with `format=metadata`
    const METADATA_HEADERS: [&'static str; 3] = ["From", "Date", "Subject"];

    const TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a client that authenticates with `tokens`
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_base_urls(tokens, Self::BASE_URL, Self::BATCH_URL)
    }

    /// Create a client against different endpoints (proxies, test servers)
    pub fn with_base_urls(
        tokens: Arc<dyn TokenProvider>,
        base_url: impl Into<String>,
        batch_url: impl Into<String>,
    ) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Self::TIMEOUT))
            .build()
            .into();

        Self {
            tokens,
            agent,
            base_url: base_url.into(),
            batch_url: batch_url.into(),
        }
    }

    fn bearer(&self) -> Result<String> {
        let token = self.tokens.access_token()?;
        Ok(format!("Bearer {}", token))
    }

    fn metadata_query() -> String {
        let mut query = String::from("format=metadata");
        for name in Self::METADATA_HEADERS {
            query.push_str("&metadataHeaders=");
            query.push_str(name);
        }
        query
    }

    fn metadata_path(id: &RecordId) -> String {
        format!(
            "{}/users/me/messages/{}?{}",
            Self::BATCH_PATH,
            id.as_str(),
            Self::metadata_query()
        )
    }

    fn read_body(response: &mut ureq::http::Response<ureq::Body>, what: &str) -> Result<String> {
        response
            .body_mut()
            .read_to_string()
            .with_context(|| format!("Failed to read {} response", what))
    }
}

impl MessageApi for GmailClient {
    fn verify(&self) -> Result<()> {
        let url = format!("{}/users/me/profile", self.base_url);
        match self
            .agent
            .get(&url)
            .header("Authorization", &self.bearer()?)
            .call()
        {
            Ok(_) => Ok(()),
            Err(ureq::Error::StatusCode(code @ (401 | 403))) => {
                Err(ConfigError::Credentials(format!("profile request rejected with HTTP {}", code)).into())
            }
            Err(e) => Err(request_error(e, "profile")),
        }
    }

    fn list_messages(
        &self,
        query: &str,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse> {
        let mut url = Url::parse(&format!("{}/users/me/messages", self.base_url))
            .context("Invalid API base URL")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", query);
            pairs.append_pair("maxResults", &max_results.clamp(1, 500).to_string());
            if let Some(token) = page_token {
                pairs.append_pair("pageToken", token);
            }
        }

        let mut response = self
            .agent
            .get(url.as_str())
            .header("Authorization", &self.bearer()?)
            .call()
            .map_err(|e| request_error(e, "list messages"))?;

        let body = Self::read_body(&mut response, "list messages")?;
        parse_json(&body, "list messages")
    }

    fn get_metadata(&self, id: &RecordId) -> Result<GmailMessage> {
        let url = format!(
            "{}/users/me/messages/{}?{}",
            self.base_url,
            id.as_str(),
            Self::metadata_query()
        );

        let mut response = self
            .agent
            .get(&url)
            .header("Authorization", &self.bearer()?)
            .call()
            .map_err(|e| request_error(e, "get message"))?;

        let body = Self::read_body(&mut response, "get message")?;
        parse_json(&body, "message")
    }

    fn batch_get_metadata(&self, ids: &[RecordId]) -> Result<Vec<Result<GmailMessage>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let paths: Vec<String> = ids.iter().map(Self::metadata_path).collect();
        let request_body = batch::encode_request(&paths);

        let mut response = self
            .agent
            .post(&self.batch_url)
            .header("Authorization", &self.bearer()?)
            .header("Content-Type", &batch::content_type())
            .send(request_body.as_str())
            .map_err(|e| request_error(e, "batch"))?;

        let boundary = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .and_then(batch::boundary_from_content_type)
            .context("Batch response has no multipart boundary")?;

        let body = Self::read_body(&mut response, "batch")?;
        let mut parts: Vec<Option<batch::BatchPart>> = vec![None; ids.len()];
        for part in batch::decode_response(&body, &boundary) {
            if let Some(slot) = parts.get_mut(part.index) {
                *slot = Some(part);
            }
        }

        Ok(ids
            .iter()
            .zip(parts)
            .map(|(id, part)| match part {
                None => Err(anyhow::anyhow!("{} missing from batch response", id)),
                Some(part) if part.status == 200 => parse_json(&part.body, "batched message"),
                Some(part) if is_permanent_status(part.status) => Err(PermanentError::new(
                    format!("{}: HTTP {}", id, part.status),
                )
                .into()),
                Some(part) => Err(anyhow::anyhow!("{}: HTTP {}", id, part.status)),
            })
            .collect())
    }
}

/// Statuses that will not change on retry
fn is_permanent_status(code: u16) -> bool {
    matches!(code, 400 | 404 | 410)
}

fn request_error(err: ureq::Error, what: &str) -> anyhow::Error {
    match err {
        ureq::Error::StatusCode(code) if is_permanent_status(code) => {
            PermanentError::new(format!("{} request failed with HTTP {}", what, code)).into()
        }
        other => anyhow::Error::new(other).context(format!("Failed to send {} request", what)),
    }
}

/// Unparseable payloads are permanent: the same bytes come back on retry
fn parse_json<T: serde::de::DeserializeOwned>(body: &str, what: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|e| PermanentError::new(format!("malformed {} response: {}", what, e)).into())
}
