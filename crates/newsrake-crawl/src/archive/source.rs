//! Where archive bytes come from
//!
//! Sources return a blocking [`Read`] because the WARC codec runs on a
//! blocking thread; the HTTP source bridges the async response body into it.

use crate::catalog::ArchiveDescriptor;
use crate::error::ArchiveError;
use async_trait::async_trait;
use flate2::read::MultiGzDecoder;
use futures::TryStreamExt;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, instrument};

/// Raw (still compressed) archive bytes
pub type ArchiveStream = Box<dyn Read + Send>;

const READ_BUFFER: usize = 256 * 1024;

#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Start a streaming read of the whole archive
    async fn open(&self, archive: &ArchiveDescriptor) -> Result<ArchiveStream, ArchiveError>;
}

/// Decompress when the archive name says so and add read buffering
pub fn decode_stream(archive: &ArchiveDescriptor, raw: ArchiveStream) -> Box<dyn BufRead + Send> {
    if archive.is_gzip() {
        // CC archives are one gzip member per record
        Box::new(BufReader::with_capacity(READ_BUFFER, MultiGzDecoder::new(raw)))
    } else {
        Box::new(BufReader::with_capacity(READ_BUFFER, raw))
    }
}

/// Streams archives over HTTP(S) without buffering them to disk
#[derive(Clone)]
pub struct HttpArchiveSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpArchiveSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ArchiveError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("newsrake/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ArchiveError::open("<client>", e))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ArchiveSource for HttpArchiveSource {
    #[instrument(skip(self, archive), fields(archive = %archive.remote_path))]
    async fn open(&self, archive: &ArchiveDescriptor) -> Result<ArchiveStream, ArchiveError> {
        let url = archive.url(&self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ArchiveError::open(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArchiveError::open(&url, format!("HTTP {}", status)));
        }
        debug!(url = %url, length = ?response.content_length(), "Streaming archive");

        let body = response.bytes_stream().map_err(std::io::Error::other);
        let reader = StreamReader::new(Box::pin(body));
        Ok(Box::new(SyncIoBridge::new(reader)))
    }
}

/// Reads archives from a local mirror of the remote layout
#[derive(Debug, Clone)]
pub struct LocalArchiveSource {
    root: PathBuf,
}

impl LocalArchiveSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArchiveSource for LocalArchiveSource {
    async fn open(&self, archive: &ArchiveDescriptor) -> Result<ArchiveStream, ArchiveError> {
        let path = self.root.join(archive.remote_path.trim_start_matches('/'));
        let file = std::fs::File::open(&path)
            .map_err(|e| ArchiveError::open(path.display().to_string(), e))?;
        Ok(Box::new(file))
    }
}
