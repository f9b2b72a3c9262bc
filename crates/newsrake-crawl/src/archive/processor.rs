//! Streaming extraction of one archive
//!
//! The WARC codec and the extractor run on a blocking thread that feeds a
//! bounded channel. Already-checkpointed transactions are skipped there. The
//! async side counts results and flushes accepted records in batches named
//! after the next transaction index.

use super::checkpoint::{checkpoint_name, Checkpoint};
use super::source::{decode_stream, ArchiveSource};
use super::warc::{WarcReader, WarcRecord};
use crate::catalog::ArchiveDescriptor;
use crate::error::{ArchiveError, ExtractError, ProcessError};
use crate::extract::Extractor;
use crate::storage::{join_path, Storage};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Seen records between periodic progress lines
const PROGRESS_INTERVAL: u64 = 5000;

/// Receives a report after each flushed batch
pub trait ProgressObserver: Send + Sync {
    fn on_checkpoint(&self, checkpoint: &Checkpoint);
}

/// Logs each checkpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_checkpoint(&self, checkpoint: &Checkpoint) {
        info!(
            archive = %checkpoint.archive,
            checkpoint = %checkpoint.path,
            batch = checkpoint.batch_size,
            flushed = checkpoint.flushed_record_offset,
            secs_per_record = ?checkpoint.secs_per_record(),
            "Checkpoint written"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorOptions {
    /// Count unexpected extractor errors and keep going instead of aborting
    pub continue_after_error: bool,
    /// Stop after the first flushed batch
    pub stop_early: bool,
    /// Records buffered between the codec thread and the extractor
    pub channel_capacity: usize,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            continue_after_error: false,
            stop_early: false,
            channel_capacity: 64,
        }
    }
}

/// Counters for one processing attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessStats {
    pub flushed_batch_count: u64,
    /// Response records handed to the extractor
    pub total_records_seen: u64,
    pub accepted_count: u64,
    pub rejected_count: u64,
    pub error_count: u64,
    /// All transactions read from the stream, skipped ones included
    pub transactions_read: u64,
    /// Ended by `stop_early` before the end of the stream
    pub stopped_early: bool,
}

pub struct ArchiveProcessor {
    source: Arc<dyn ArchiveSource>,
    storage: Arc<dyn Storage>,
    extractor: Arc<dyn Extractor>,
    observer: Arc<dyn ProgressObserver>,
    options: ProcessorOptions,
}

/// One transaction as seen from the codec thread
enum CodecEvent {
    /// Below the resume point, or not a response
    Skipped,
    Extracted {
        index: u64,
        result: Result<Value, ExtractError>,
    },
}

/// Batch state threaded through one `process` call
struct Batch<'a> {
    archive_path: &'a str,
    destination: &'a str,
    records: Vec<Value>,
    flushed: u64,
    started: Instant,
}

impl ArchiveProcessor {
    pub fn new(
        source: Arc<dyn ArchiveSource>,
        storage: Arc<dyn Storage>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            source,
            storage,
            extractor,
            observer: Arc::new(TracingObserver),
            options: ProcessorOptions::default(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_options(mut self, options: ProcessorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> ProcessorOptions {
        self.options
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Stream `archive`, writing checkpoints under `destination`
    ///
    /// Transactions with index below `resume_from` are skipped without being
    /// counted. Returns after the stream ends (or after the first batch with
    /// `stop_early`).
    #[instrument(skip(self, archive), fields(archive = %archive.remote_path))]
    pub async fn process(
        &self,
        archive: &ArchiveDescriptor,
        destination: &str,
        flush_every: usize,
        resume_from: u64,
    ) -> Result<ProcessStats, ProcessError> {
        let flush_every = flush_every.max(1);
        let archive_path = archive.remote_path.clone();
        let raw = self.source.open(archive).await?;

        let (tx, mut rx) = mpsc::channel::<Result<CodecEvent, ArchiveError>>(
            self.options.channel_capacity.max(1),
        );
        let codec_archive = archive.clone();
        let extractor = self.extractor.clone();
        let codec = tokio::task::spawn_blocking(move || {
            let reader = WarcReader::new(decode_stream(&codec_archive, raw));
            for (index, item) in (0u64..).zip(reader) {
                let event = item.map(|record| classify(&*extractor, index, resume_from, &record));
                let failed = event.is_err();
                if tx.blocking_send(event).is_err() || failed {
                    break;
                }
            }
        });

        if resume_from > 0 {
            info!(resume_from, "Resuming archive from checkpoint");
        }

        let mut stats = ProcessStats::default();
        let mut batch = Batch {
            archive_path: &archive_path,
            destination,
            records: Vec::with_capacity(flush_every.min(4096)),
            flushed: 0,
            started: Instant::now(),
        };

        while let Some(event) = rx.recv().await {
            let event = event?;
            stats.transactions_read += 1;
            let (index, result) = match event {
                CodecEvent::Skipped => continue,
                CodecEvent::Extracted { index, result } => (index, result),
            };

            stats.total_records_seen += 1;
            match result {
                Ok(value) => {
                    stats.accepted_count += 1;
                    batch.records.push(value);
                },
                Err(e) if e.is_local() => {
                    stats.rejected_count += 1;
                    debug!(index, reason = %e, "Record discarded");
                },
                Err(e) => {
                    stats.error_count += 1;
                    if !self.options.continue_after_error {
                        return Err(ProcessError::Extractor { index, source: e });
                    }
                    warn!(index, error = %e, "Extractor failed, continuing");
                },
            }

            if stats.total_records_seen % PROGRESS_INTERVAL == 0 {
                log_progress(&stats, &batch);
            }

            if batch.records.len() >= flush_every {
                self.flush(&mut batch, index + 1, &mut stats).await?;
                if self.options.stop_early {
                    stats.stopped_early = true;
                    info!("Stopping early after first batch");
                    return Ok(stats);
                }
            }
        }

        // A closed channel is only a clean end of stream if the codec returned
        codec.await.map_err(|e| {
            ArchiveError::Io(std::io::Error::other(format!(
                "archive codec thread failed after {} transactions: {}",
                stats.transactions_read, e
            )))
        })?;

        if !batch.records.is_empty() {
            self.flush(&mut batch, stats.transactions_read, &mut stats)
                .await?;
        }

        info!(
            accepted = stats.accepted_count,
            rejected = stats.rejected_count,
            errors = stats.error_count,
            batches = stats.flushed_batch_count,
            transactions = stats.transactions_read,
            "Archive stream finished"
        );
        Ok(stats)
    }

    async fn flush(
        &self,
        batch: &mut Batch<'_>,
        sequence: u64,
        stats: &mut ProcessStats,
    ) -> Result<(), ProcessError> {
        let path = join_path(batch.destination, &checkpoint_name(sequence));
        let bytes = serde_json::to_vec(&batch.records)?;
        self.storage.write(&path, bytes).await?;

        let batch_size = batch.records.len();
        batch.records.clear();
        batch.flushed += batch_size as u64;
        stats.flushed_batch_count += 1;

        self.observer.on_checkpoint(&Checkpoint {
            archive: batch.archive_path.to_string(),
            path,
            sequence,
            batch_size,
            flushed_record_offset: batch.flushed,
            records_seen: stats.total_records_seen,
            elapsed: batch.started.elapsed(),
        });
        Ok(())
    }
}

fn classify(
    extractor: &dyn Extractor,
    index: u64,
    resume_from: u64,
    record: &WarcRecord,
) -> CodecEvent {
    if index < resume_from || !record.is_response() {
        return CodecEvent::Skipped;
    }
    CodecEvent::Extracted {
        index,
        result: extractor.extract(record),
    }
}

fn log_progress(stats: &ProcessStats, batch: &Batch<'_>) {
    let elapsed = batch.started.elapsed().as_secs_f64();
    info!(
        archive = %batch.archive_path,
        pass = stats.accepted_count,
        discard = stats.rejected_count,
        error = stats.error_count,
        secs_per_record = elapsed / stats.total_records_seen.max(1) as f64,
        "Extraction progress"
    );
}
