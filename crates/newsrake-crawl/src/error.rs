//! Error types for the crawl pipeline
//!
//! Each layer has its own enum. [`CrawlError`] is fatal for a run,
//! [`ProcessError`] is scoped to one archive and ends up in that archive's
//! ledger outcome, [`ExtractError`] is scoped to one record.

use thiserror::Error;

/// Result type for run-level operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Run-level failures
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Catalog listing failed with exit code {exit_code}: {output}")]
    Catalog { exit_code: i32, output: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrawlError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn ledger(msg: impl Into<String>) -> Self {
        Self::Ledger(msg.into())
    }
}

/// Failures of the checkpoint destination
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid destination '{0}'")]
    InvalidDestination(String),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Container-level failures while reading one archive
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Failed to open archive {url}: {message}")]
    Open { url: String, message: String },

    #[error("Archive stream read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid WARC header at record {index}: {message}")]
    InvalidHeader { index: u64, message: String },

    #[error("Archive truncated inside record {index}")]
    Truncated { index: u64 },
}

impl ArchiveError {
    pub fn open(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Open {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid_header(index: u64, message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            index,
            message: message.into(),
        }
    }
}

/// Per-record extractor failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// Payload bytes are not valid text. Local to the record.
    #[error("Payload decode failed: {0}")]
    Decode(String),

    /// Record is well-formed but not wanted. Local to the record.
    #[error("Record rejected: {0}")]
    Rejected(String),

    /// Anything else the extractor could not handle
    #[error("Extractor failed: {0}")]
    Unexpected(String),
}

impl ExtractError {
    /// Whether the error only discards the current record
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Rejected(_))
    }
}

/// Failures that end the processing of one archive
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Archive container unreadable: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Checkpoint write failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Checkpoint encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Extractor failed on transaction {index}: {source}")]
    Extractor { index: u64, source: ExtractError },
}
