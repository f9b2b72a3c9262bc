//! Streaming WARC container reader
//!
//! Reads records one at a time from any [`BufRead`], so memory use is
//! bounded by the largest single record. Records are separated by blank
//! lines; each record is a `WARC/x.y` version line, `Name: value` headers,
//! a blank line and `Content-Length` payload bytes.

use crate::error::ArchiveError;
use std::io::{BufRead, Read};

/// One WARC record (a "transaction" of the archive)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarcRecord {
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub payload: Vec<u8>,
}

impl WarcRecord {
    /// Case-insensitive header lookup; first occurrence wins
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn warc_type(&self) -> Option<&str> {
        self.header("WARC-Type")
    }

    pub fn target_uri(&self) -> Option<&str> {
        self.header("WARC-Target-URI")
    }

    pub fn date(&self) -> Option<&str> {
        self.header("WARC-Date")
    }

    pub fn record_id(&self) -> Option<&str> {
        self.header("WARC-Record-ID")
    }

    /// Only response records carry fetched documents
    pub fn is_response(&self) -> bool {
        self.warc_type()
            .is_some_and(|kind| kind.eq_ignore_ascii_case("response"))
    }
}

/// Iterator over the records of a decoded WARC stream
///
/// Yields `Err` at most once; a container error ends the iteration.
pub struct WarcReader<R> {
    inner: R,
    index: u64,
    finished: bool,
    line: Vec<u8>,
}

impl<R: BufRead> WarcReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            index: 0,
            finished: false,
            line: Vec::with_capacity(256),
        }
    }

    /// Number of records yielded so far
    pub fn records_read(&self) -> u64 {
        self.index
    }

    /// Read one line without its terminator. `Ok(false)` at end of stream.
    fn read_line(&mut self) -> Result<bool, ArchiveError> {
        self.line.clear();
        let n = self.inner.read_until(b'\n', &mut self.line)?;
        if n == 0 {
            return Ok(false);
        }
        while matches!(self.line.last(), Some(b'\n' | b'\r')) {
            self.line.pop();
        }
        Ok(true)
    }

    fn read_record(&mut self) -> Result<Option<WarcRecord>, ArchiveError> {
        // Skip the blank separator lines left by the previous record
        loop {
            if !self.read_line()? {
                return Ok(None);
            }
            if !self.line.is_empty() {
                break;
            }
        }

        let version = String::from_utf8_lossy(&self.line).into_owned();
        if !version.starts_with("WARC/") {
            return Err(ArchiveError::invalid_header(
                self.index,
                format!("expected WARC version line, found {:?}", truncate(&version)),
            ));
        }

        let mut headers: Vec<(String, String)> = Vec::new();
        loop {
            if !self.read_line()? {
                return Err(ArchiveError::Truncated { index: self.index });
            }
            if self.line.is_empty() {
                break;
            }

            let text = String::from_utf8_lossy(&self.line);
            if text.starts_with([' ', '\t']) {
                // Folded continuation of the previous header
                match headers.last_mut() {
                    Some((_, value)) => {
                        value.push(' ');
                        value.push_str(text.trim());
                    },
                    None => {
                        return Err(ArchiveError::invalid_header(
                            self.index,
                            "continuation line before first header",
                        ))
                    },
                }
                continue;
            }

            let Some((name, value)) = text.split_once(':') else {
                return Err(ArchiveError::invalid_header(
                    self.index,
                    format!("malformed header line {:?}", truncate(&text)),
                ));
            };
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        let length = headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("Content-Length"))
            .ok_or_else(|| ArchiveError::invalid_header(self.index, "missing Content-Length"))?
            .1
            .parse::<u64>()
            .map_err(|e| {
                ArchiveError::invalid_header(self.index, format!("bad Content-Length: {}", e))
            })?;

        let mut payload = Vec::with_capacity(length.min(1 << 20) as usize);
        (&mut self.inner).take(length).read_to_end(&mut payload)?;
        if (payload.len() as u64) < length {
            return Err(ArchiveError::Truncated { index: self.index });
        }

        Ok(Some(WarcRecord {
            version,
            headers,
            payload,
        }))
    }
}

impl<R: BufRead> Iterator for WarcReader<R> {
    type Item = Result<WarcRecord, ArchiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => {
                self.index += 1;
                Some(Ok(record))
            },
            Ok(None) => {
                self.finished = true;
                None
            },
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            },
        }
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(64).collect()
}
