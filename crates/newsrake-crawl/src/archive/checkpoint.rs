//! Checkpoint naming and resume-offset discovery
//!
//! A checkpoint named `last_record_<N>.json` means every transaction with a
//! zero-based index below `N` is accounted for, so `N` is the offset to
//! resume from.

use crate::error::StorageError;
use crate::storage::Storage;
use serde::Serialize;
use std::time::Duration;

const CHECKPOINT_PREFIX: &str = "last_record_";
const CHECKPOINT_SUFFIX: &str = ".json";

/// Progress report emitted after every flushed batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Checkpoint {
    /// Remote path of the archive
    pub archive: String,
    /// Logical path of the written batch
    pub path: String,
    /// `N` in `last_record_<N>.json`
    pub sequence: u64,
    pub batch_size: usize,
    /// Accepted records flushed so far in this attempt
    pub flushed_record_offset: u64,
    pub records_seen: u64,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl Checkpoint {
    pub fn secs_per_record(&self) -> Option<f64> {
        (self.records_seen > 0).then(|| self.elapsed.as_secs_f64() / self.records_seen as f64)
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

pub fn checkpoint_name(sequence: u64) -> String {
    format!("{}{}{}", CHECKPOINT_PREFIX, sequence, CHECKPOINT_SUFFIX)
}

/// Sequence number of a checkpoint file name (or path), if it is one
pub fn parse_checkpoint_name(name: &str) -> Option<u64> {
    let base = name.rsplit('/').next().unwrap_or(name);
    base.strip_prefix(CHECKPOINT_PREFIX)?
        .strip_suffix(CHECKPOINT_SUFFIX)?
        .parse()
        .ok()
}

/// Highest checkpoint sequence among `names`; 0 when there is none
pub fn find_latest_checkpoint<I, S>(names: I) -> u64
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter_map(|name| parse_checkpoint_name(name.as_ref()))
        .max()
        .unwrap_or(0)
}

/// Resume offset for the archive whose checkpoints live under `destination`
pub async fn latest_checkpoint(storage: &dyn Storage, destination: &str) -> Result<u64, StorageError> {
    let names = storage.list(destination).await?;
    Ok(find_latest_checkpoint(names))
}
