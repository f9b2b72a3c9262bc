//! Record extraction
//!
//! The processor hands every response record to an [`Extractor`]. The
//! default [`ResponseExtractor`] keeps the HTTP body as text along with the
//! record metadata; article parsing is left to downstream consumers.

use crate::archive::warc::WarcRecord;
use crate::error::ExtractError;
use serde_json::{json, Value};

/// Turns one archive transaction into one output record
pub trait Extractor: Send + Sync {
    fn extract(&self, transaction: &WarcRecord) -> Result<Value, ExtractError>;
}

#[derive(Debug, Clone, Default)]
pub struct ResponseExtractor {
    valid_hosts: Vec<String>,
    ignore_unicode_errors: bool,
}

impl ResponseExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept only these hosts and their subdomains; empty accepts all
    pub fn with_valid_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.valid_hosts = hosts
            .into_iter()
            .map(|h| h.into().trim().trim_start_matches("www.").to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        self
    }

    /// Replace invalid UTF-8 instead of rejecting the record
    pub fn with_ignore_unicode_errors(mut self, ignore: bool) -> Self {
        self.ignore_unicode_errors = ignore;
        self
    }

    fn host_allowed(&self, host: &str) -> bool {
        if self.valid_hosts.is_empty() {
            return true;
        }
        let host = host.to_ascii_lowercase();
        self.valid_hosts.iter().any(|valid| {
            host == *valid
                || host
                    .strip_suffix(valid.as_str())
                    .is_some_and(|rest| rest.ends_with('.'))
        })
    }
}

/// Status line and headers of an HTTP response payload
struct HttpHead<'a> {
    status: Option<u16>,
    content_type: Option<String>,
    body: &'a [u8],
}

fn split_http(payload: &[u8]) -> Option<HttpHead<'_>> {
    let (head_len, sep_len) = find(payload, b"\r\n\r\n")
        .map(|i| (i, 4))
        .or_else(|| find(payload, b"\n\n").map(|i| (i, 2)))?;

    let head = String::from_utf8_lossy(&payload[..head_len]);
    let mut lines = head.lines();
    let status_line = lines.next()?;
    if !status_line.starts_with("HTTP/") {
        return None;
    }
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok());

    let content_type = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.trim().to_string());

    Some(HttpHead {
        status,
        content_type,
        body: &payload[head_len + sep_len..],
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn is_textual(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime.starts_with("text/") || mime.contains("html") || mime.contains("xml")
}

impl Extractor for ResponseExtractor {
    fn extract(&self, transaction: &WarcRecord) -> Result<Value, ExtractError> {
        let url = transaction
            .target_uri()
            .ok_or_else(|| ExtractError::Rejected("missing WARC-Target-URI".into()))?;
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| ExtractError::Rejected(format!("no host in {}", url)))?;
        if !self.host_allowed(&host) {
            return Err(ExtractError::Rejected(format!("host {} not in valid hosts", host)));
        }

        let head = split_http(&transaction.payload)
            .ok_or_else(|| ExtractError::Decode("payload is not an HTTP response".into()))?;
        if let Some(status) = head.status.filter(|s| !(200..300).contains(s)) {
            return Err(ExtractError::Rejected(format!("HTTP status {}", status)));
        }
        if let Some(ct) = head.content_type.as_deref().filter(|ct| !is_textual(ct)) {
            return Err(ExtractError::Rejected(format!("content type {}", ct)));
        }
        if head.body.iter().all(u8::is_ascii_whitespace) {
            return Err(ExtractError::Rejected("empty response".into()));
        }

        let body = match std::str::from_utf8(head.body) {
            Ok(text) => text.to_string(),
            Err(_) if self.ignore_unicode_errors => String::from_utf8_lossy(head.body).into_owned(),
            Err(e) => return Err(ExtractError::Decode(e.to_string())),
        };

        Ok(json!({
            "url": url,
            "warc_date": transaction.date(),
            "record_id": transaction.record_id(),
            "content_type": head.content_type,
            "status": head.status,
            "host": host,
            "body": body,
        }))
    }
}
