//! Multipart/mixed encoding for the batch endpoint
//!
//! A batch request carries one embedded `GET` per message. Each part is tagged
//! with `Content-ID: <item-N>` and the server answers with
//! `Content-ID: <response-item-N>`, which is how responses are matched back to
//! identifiers regardless of the order parts come back in.

/// Boundary used for outgoing batch requests
pub const BOUNDARY: &str = "tally_batch_boundary";

/// One decoded response part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPart {
    /// Position of the matching request part
    pub index: usize,
    /// HTTP status of the embedded response
    pub status: u16,
    /// Embedded response body (JSON for successful parts)
    pub body: String,
}

/// Content-Type header value for a batch request
pub fn content_type() -> String {
    format!("multipart/mixed; boundary={}", BOUNDARY)
}

/// Encode one `GET` part per request path
pub fn encode_request(paths: &[String]) -> String {
    let mut body = String::new();
    for (index, path) in paths.iter().enumerate() {
        body.push_str(&format!(
            "--{}\r\nContent-Type: application/http\r\nContent-ID: <item-{}>\r\n\r\nGET {}\r\n\r\n",
            BOUNDARY, index, path
        ));
    }
    body.push_str(&format!("--{}--\r\n", BOUNDARY));
    body
}

/// Extract the boundary parameter from a multipart Content-Type value
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Decode a multipart/mixed batch response
///
/// Parts without a recognisable Content-ID or status line are skipped; the
/// caller treats their identifiers as missing.
pub fn decode_response(body: &str, boundary: &str) -> Vec<BatchPart> {
    let delimiter = format!("--{}", boundary);
    let normalized = body.replace("\r\n", "\n");

    normalized
        .split(delimiter.as_str())
        .filter_map(decode_part)
        .collect()
}

fn decode_part(section: &str) -> Option<BatchPart> {
    if section.starts_with("--") {
        return None;
    }
    let section = section.trim_start_matches('\n');
    let (part_headers, http) = section.split_once("\n\n")?;

    let index = part_headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case("content-id") {
            return None;
        }
        let id = value.trim().trim_start_matches('<').trim_end_matches('>');
        let id = id.strip_prefix("response-").unwrap_or(id);
        id.strip_prefix("item-")?.parse().ok()
    })?;

    let (head, payload) = http.split_once("\n\n").unwrap_or((http, ""));
    let status = head
        .lines()
        .next()?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()?;

    Some(BatchPart {
        index,
        status,
        body: payload.trim().to_string(),
    })
}
