//! Runs archive processing over a worker pool
//!
//! Each archive gets its resume offset from its checkpoint directory, is
//! processed, and gets exactly one ledger line whatever the result. Run-wide
//! counters live in an explicit [`RunContext`].

use crate::archive::{latest_checkpoint, ArchiveProcessor, ProcessStats};
use crate::catalog::ArchiveDescriptor;
use crate::error::ProcessError;
use crate::ledger::{ProcessingOutcome, StatusLogger};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

/// Cumulative counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub archives_completed: u64,
    pub archives_failed: u64,
    /// Ended before the end of the stream (`stop_early`)
    pub archives_incomplete: u64,
    pub records_accepted: u64,
    pub records_seen: u64,
    pub records_rejected: u64,
    pub extractor_errors: u64,
}

impl RunStats {
    pub fn archives_finished(&self) -> u64 {
        self.archives_completed + self.archives_failed + self.archives_incomplete
    }

    fn record(&mut self, result: &Result<ProcessStats, ProcessError>) {
        match result {
            Ok(stats) => {
                if stats.stopped_early {
                    self.archives_incomplete += 1;
                } else {
                    self.archives_completed += 1;
                }
                self.records_accepted += stats.accepted_count;
                self.records_seen += stats.total_records_seen;
                self.records_rejected += stats.rejected_count;
                self.extractor_errors += stats.error_count;
            },
            Err(_) => self.archives_failed += 1,
        }
    }
}

/// Throughput derived from a [`RunStats`] snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Throughput {
    pub elapsed_secs: f64,
    pub secs_per_record: Option<f64>,
    pub archives_per_hour: f64,
    /// Remaining archives divided by archives per hour
    pub eta_hours: Option<f64>,
}

impl Throughput {
    pub fn compute(elapsed: Duration, stats: &RunStats, remaining: u64) -> Self {
        let elapsed_secs = elapsed.as_secs_f64();
        let finished = stats.archives_finished() as f64;
        let archives_per_hour = if elapsed_secs > 0.0 {
            finished / (elapsed_secs / 3600.0)
        } else {
            0.0
        };
        Self {
            elapsed_secs,
            secs_per_record: (stats.records_seen > 0)
                .then(|| elapsed_secs / stats.records_seen as f64),
            archives_per_hour,
            eta_hours: (archives_per_hour > 0.0).then(|| remaining as f64 / archives_per_hour),
        }
    }
}

/// State shared by the archives of one run
#[derive(Debug)]
pub struct RunContext {
    started: Instant,
    planned: u64,
    stats: Mutex<RunStats>,
}

impl RunContext {
    pub fn new(planned: usize) -> Self {
        Self {
            started: Instant::now(),
            planned: planned as u64,
            stats: Mutex::new(RunStats::default()),
        }
    }

    pub fn snapshot(&self) -> RunStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold one result in and return the updated throughput
    fn record(&self, result: &Result<ProcessStats, ProcessError>) -> (RunStats, Throughput) {
        let stats = {
            let mut guard = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            guard.record(result);
            *guard
        };
        let remaining = self.planned.saturating_sub(stats.archives_finished());
        (stats, Throughput::compute(self.started.elapsed(), &stats, remaining))
    }
}

#[derive(Clone)]
pub struct Scheduler {
    processor: Arc<ArchiveProcessor>,
    status: StatusLogger,
    base_url: String,
    host: String,
    flush_every: usize,
}

impl Scheduler {
    pub fn new(
        processor: Arc<ArchiveProcessor>,
        status: StatusLogger,
        base_url: impl Into<String>,
        host: impl Into<String>,
        flush_every: usize,
    ) -> Self {
        Self {
            processor,
            status,
            base_url: base_url.into(),
            host: host.into(),
            flush_every,
        }
    }

    /// Process every item; sequentially when `worker_count <= 1`
    ///
    /// With more workers each archive runs as its own task, at most
    /// `worker_count` at a time.
    pub async fn run(&self, worker_count: usize, work_items: Vec<ArchiveDescriptor>) -> RunStats {
        let ctx = Arc::new(RunContext::new(work_items.len()));
        info!(
            archives = work_items.len(),
            workers = worker_count.max(1),
            "Starting archive processing"
        );

        if worker_count <= 1 {
            for archive in work_items {
                self.run_one(&ctx, archive).await;
            }
        } else {
            stream::iter(work_items)
                .map(|archive| {
                    let scheduler = self.clone();
                    let ctx = ctx.clone();
                    let remote_path = archive.remote_path.clone();
                    async move {
                        let task =
                            tokio::spawn(async move { scheduler.run_one(&ctx, archive).await });
                        if let Err(e) = task.await {
                            error!(archive = %remote_path, error = %e, "✗ Archive task aborted");
                        }
                    }
                })
                .buffer_unordered(worker_count)
                .for_each(|_| async {})
                .await;
        }

        ctx.snapshot()
    }

    #[instrument(skip(self, ctx, archive), fields(archive = %archive.remote_path))]
    async fn run_one(&self, ctx: &RunContext, archive: ArchiveDescriptor) -> ProcessingOutcome {
        let url = archive.url(&self.base_url);
        let destination = archive.output_key();
        let start_ts = Utc::now();

        let resume_from = match latest_checkpoint(&**self.processor.storage(), &destination).await {
            Ok(offset) => offset,
            Err(e) => {
                warn!(error = %e, "Could not list checkpoints, starting from the beginning");
                0
            },
        };

        let result = self
            .processor
            .process(&archive, &destination, self.flush_every, resume_from)
            .await;
        let outcome = self.outcome(&url, start_ts, resume_from, &result);

        match &result {
            Ok(stats) => info!(
                url = %url,
                accepted = stats.accepted_count,
                rejected = stats.rejected_count,
                errors = stats.error_count,
                "✓ Archive processed"
            ),
            Err(e) => warn!(url = %url, error = %e, "✗ Archive failed"),
        }

        if let Err(e) = self.status.append(outcome.clone()).await {
            error!(url = %url, error = %e, "Failed to append ledger line");
        }

        let (stats, throughput) = ctx.record(&result);
        info!(
            finished = stats.archives_finished(),
            planned = ctx.planned,
            elapsed_secs = throughput.elapsed_secs,
            secs_per_record = ?throughput.secs_per_record,
            archives_per_hour = throughput.archives_per_hour,
            eta_hours = ?throughput.eta_hours,
            "Run progress"
        );

        outcome
    }

    fn outcome(
        &self,
        url: &str,
        start_ts: chrono::DateTime<Utc>,
        resume_from: u64,
        result: &Result<ProcessStats, ProcessError>,
    ) -> ProcessingOutcome {
        let mut outcome = ProcessingOutcome {
            url: url.to_string(),
            completed: false,
            record_count: 0,
            error_count: 0,
            host: self.host.clone(),
            start_ts,
            end_ts: Utc::now(),
            seen_count: None,
            rejected_count: None,
            resumed_from: (resume_from > 0).then_some(resume_from),
            failure: None,
        };
        match result {
            Ok(stats) => {
                outcome.completed = !stats.stopped_early;
                outcome.record_count = stats.accepted_count;
                outcome.error_count = stats.error_count;
                outcome.seen_count = Some(stats.total_records_seen);
                outcome.rejected_count = Some(stats.rejected_count);
            },
            Err(e) => {
                outcome.error_count = u64::from(matches!(e, ProcessError::Extractor { .. }));
                outcome.failure = Some(e.to_string());
            },
        }
        outcome
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::archive::source::ArchiveStream;
    use crate::archive::{ArchiveSource, WarcRecord};
    use crate::error::{ArchiveError, ExtractError};
    use crate::extract::Extractor;
    use crate::ledger::CompletionLedger;
    use crate::storage::LocalStorage;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    const BASE: &str = "https://data.commoncrawl.org/";

    /// One response record per archive. Paths containing "bad" get a reader
    /// that panics partway into the record.
    struct OneRecordSource;

    struct PanicAtEnd(std::io::Cursor<Vec<u8>>);

    impl std::io::Read for PanicAtEnd {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = std::io::Read::read(&mut self.0, buf)?;
            if n == 0 {
                panic!("connection dropped mid-record");
            }
            Ok(n)
        }
    }

    #[async_trait]
    impl ArchiveSource for OneRecordSource {
        async fn open(&self, archive: &ArchiveDescriptor) -> Result<ArchiveStream, ArchiveError> {
            let body = "article";
            let mut warc = format!(
                "WARC/1.0\r\nWARC-Type: response\r\nContent-Length: {}\r\n\r\n{}\r\n\r\n",
                body.len(),
                body
            )
            .into_bytes();
            if archive.remote_path.contains("bad") {
                warc.truncate(warc.len() - 8);
                return Ok(Box::new(PanicAtEnd(std::io::Cursor::new(warc))));
            }
            Ok(Box::new(std::io::Cursor::new(warc)))
        }
    }

    struct SlowExtractor(Duration);

    impl Extractor for SlowExtractor {
        fn extract(&self, _transaction: &WarcRecord) -> Result<Value, ExtractError> {
            std::thread::sleep(self.0);
            Ok(json!({ "ok": true }))
        }
    }

    fn scheduler(dir: &TempDir, extract_delay: Duration) -> Scheduler {
        let processor = ArchiveProcessor::new(
            Arc::new(OneRecordSource),
            Arc::new(LocalStorage::new(dir.path().join("out"))),
            Arc::new(SlowExtractor(extract_delay)),
        );
        Scheduler::new(
            Arc::new(processor),
            StatusLogger::new(dir.path().join("ledger.jsonl")),
            BASE,
            "worker-a",
            10,
        )
    }

    fn archives(names: &[&str]) -> Vec<ArchiveDescriptor> {
        names
            .iter()
            .map(|n| ArchiveDescriptor::from_remote_path(format!("crawl-data/CC-NEWS/2021/06/{}", n)))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_workers_process_archives_in_parallel() {
        let dir = TempDir::new().unwrap();
        let delay = Duration::from_millis(300);
        let items = archives(&[
            "CC-NEWS-20210601000000-00001.warc",
            "CC-NEWS-20210602000000-00002.warc",
            "CC-NEWS-20210603000000-00003.warc",
            "CC-NEWS-20210604000000-00004.warc",
        ]);

        let started = Instant::now();
        let stats = scheduler(&dir, delay).run(4, items).await;
        let elapsed = started.elapsed();

        assert_eq!(stats.archives_completed, 4);
        assert!(elapsed < delay * 3, "4 archives took {:?}", elapsed);
        assert_eq!(CompletionLedger::load(dir.path().join("ledger.jsonl")).unwrap().len(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_codec_panic_is_logged_incomplete() {
        let dir = TempDir::new().unwrap();
        let items = archives(&[
            "CC-NEWS-20210601000000-00001.warc",
            "CC-NEWS-20210602000000-00002-bad.warc",
        ]);

        let stats = scheduler(&dir, Duration::ZERO).run(2, items).await;
        assert_eq!(stats.archives_completed, 1);
        assert_eq!(stats.archives_failed, 1);

        let outcomes = CompletionLedger::outcomes(dir.path().join("ledger.jsonl")).unwrap();
        assert_eq!(outcomes.len(), 2);
        let failed = outcomes.iter().find(|o| o.url.contains("bad")).unwrap();
        assert!(!failed.completed);
        assert_eq!(failed.record_count, 0);
        assert!(failed.failure.as_deref().unwrap().contains("codec thread failed"));
    }

    #[test]
    fn test_throughput_eta_is_remaining_over_rate() {
        let stats = RunStats {
            archives_completed: 2,
            records_seen: 100,
            ..RunStats::default()
        };
        let t = Throughput::compute(Duration::from_secs(3600), &stats, 6);
        assert_eq!(t.archives_per_hour, 2.0);
        assert_eq!(t.eta_hours, Some(3.0));
        assert_eq!(t.secs_per_record, Some(36.0));
    }

    #[test]
    fn test_throughput_before_any_progress() {
        let t = Throughput::compute(Duration::ZERO, &RunStats::default(), 10);
        assert_eq!(t.archives_per_hour, 0.0);
        assert_eq!(t.eta_hours, None);
        assert_eq!(t.secs_per_record, None);
    }

    #[test]
    fn test_run_stats_record() {
        let mut stats = RunStats::default();
        stats.record(&Ok(ProcessStats {
            accepted_count: 3,
            total_records_seen: 5,
            rejected_count: 2,
            ..ProcessStats::default()
        }));
        stats.record(&Ok(ProcessStats {
            stopped_early: true,
            ..ProcessStats::default()
        }));
        stats.record(&Err(ProcessError::Archive(
            crate::error::ArchiveError::Truncated { index: 0 },
        )));

        assert_eq!(stats.archives_completed, 1);
        assert_eq!(stats.archives_incomplete, 1);
        assert_eq!(stats.archives_failed, 1);
        assert_eq!(stats.archives_finished(), 3);
        assert_eq!(stats.records_accepted, 3);
    }

    #[test]
    fn test_context_remaining_saturates() {
        let ctx = RunContext::new(1);
        let ok: Result<ProcessStats, ProcessError> = Ok(ProcessStats::default());
        ctx.record(&ok);
        let (stats, _) = ctx.record(&ok);
        assert_eq!(stats.archives_finished(), 2);
        assert_eq!(ctx.snapshot(), stats);
    }
}
