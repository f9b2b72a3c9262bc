//! End-to-end crawl run
//!
//! Catalog, then ledger, then partition, then schedule. Startup failures
//! (catalog, ledger read, destination) end the run; per-archive failures are
//! recorded in the ledger and never do.

use crate::archive::{
    ArchiveProcessor, ArchiveSource, HttpArchiveSource, ProcessorOptions, ProgressObserver,
    TracingObserver,
};
use crate::catalog::{ArchiveDescriptor, CatalogIndex, ListingRunner, ShellListing};
use crate::config::CrawlConfig;
use crate::error::{CrawlError, Result};
use crate::extract::{Extractor, ResponseExtractor};
use crate::ledger::{CompletionLedger, StatusLogger};
use crate::partition::{partition, resolve_identity, Roster, ShardAssignment};
use crate::scheduler::{RunStats, Scheduler};
use crate::storage::{Destination, Storage};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// What this worker is about to process
#[derive(Debug, Clone)]
pub struct WorkPlan {
    pub assignment: ShardAssignment,
    /// Archives in the date window
    pub catalog_size: usize,
    /// Archives already completed according to the ledger
    pub skipped: usize,
    /// This worker's shard, newest first
    pub items: Vec<ArchiveDescriptor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub identity: String,
    pub catalog_size: usize,
    pub skipped: usize,
    pub planned: usize,
    pub stats: RunStats,
    pub elapsed_secs: f64,
}

pub struct Crawler {
    config: CrawlConfig,
    identity: String,
    catalog: CatalogIndex,
    source: Arc<dyn ArchiveSource>,
    storage: Arc<dyn Storage>,
    extractor: Arc<dyn Extractor>,
    observer: Arc<dyn ProgressObserver>,
}

impl Crawler {
    /// Production wiring: shell listing, HTTP archives, configured destination
    pub async fn from_config(config: CrawlConfig) -> Result<Self> {
        let destination = Destination::parse(&config.destination)?;
        let storage = destination.open(&config.storage).await?;
        let source = HttpArchiveSource::new(config.base_url.clone())
            .map_err(|e| CrawlError::config(e.to_string()))?;
        let extractor = ResponseExtractor::new()
            .with_valid_hosts(config.valid_hosts.iter().cloned())
            .with_ignore_unicode_errors(config.ignore_unicode_errors);
        let runner = ShellListing::new(config.listing_command.clone());

        info!(destination = %destination, "Checkpoint destination ready");
        Ok(Self::new(
            config,
            Arc::new(runner),
            Arc::new(source),
            storage,
            Arc::new(extractor),
        ))
    }

    pub fn new(
        config: CrawlConfig,
        runner: Arc<dyn ListingRunner>,
        source: Arc<dyn ArchiveSource>,
        storage: Arc<dyn Storage>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        let identity = resolve_identity(config.identity.as_deref());
        let catalog = CatalogIndex::new(runner, config.archive_suffix.clone());
        Self {
            config,
            identity,
            catalog,
            source,
            storage,
            extractor,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Fetch the catalog, drop completed archives and take this worker's shard
    pub async fn plan(&self) -> Result<WorkPlan> {
        let archives = self
            .catalog
            .fetch(
                self.config.min_date,
                self.config.max_date,
                self.config.cache_path.as_deref(),
            )
            .await?;
        let catalog_size = archives.len();

        let done: HashSet<String> = if self.config.continue_process {
            CompletionLedger::load(&self.config.ledger_path)?
        } else {
            HashSet::new()
        };

        let unprocessed: Vec<ArchiveDescriptor> = archives
            .into_iter()
            .filter(|archive| !done.contains(&archive.url(&self.config.base_url)))
            .collect();
        let skipped = catalog_size - unprocessed.len();

        let roster = Roster::new(self.config.roster.iter().cloned());
        let assignment = ShardAssignment::resolve(&roster, &self.identity);
        let items = partition(unprocessed, assignment);

        info!(
            identity = %self.identity,
            catalog_size,
            skipped,
            assigned = items.len(),
            "Work plan ready"
        );

        Ok(WorkPlan {
            assignment,
            catalog_size,
            skipped,
            items,
        })
    }

    /// Plan and process this worker's shard
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let plan = self.plan().await?;
        let planned = plan.items.len();

        let processor = ArchiveProcessor::new(
            self.source.clone(),
            self.storage.clone(),
            self.extractor.clone(),
        )
        .with_observer(self.observer.clone())
        .with_options(ProcessorOptions {
            continue_after_error: self.config.continue_after_error,
            stop_early: self.config.stop_early,
            ..ProcessorOptions::default()
        });

        let scheduler = Scheduler::new(
            Arc::new(processor),
            StatusLogger::new(&self.config.ledger_path),
            self.config.base_url.clone(),
            self.identity.clone(),
            self.config.flush_every,
        );
        let stats = scheduler.run(self.config.workers, plan.items).await;

        let summary = RunSummary {
            identity: self.identity.clone(),
            catalog_size: plan.catalog_size,
            skipped: plan.skipped,
            planned,
            stats,
            elapsed_secs: elapsed_secs(started.elapsed()),
        };
        info!(
            completed = stats.archives_completed,
            failed = stats.archives_failed,
            accepted = stats.records_accepted,
            skipped = summary.skipped,
            elapsed_secs = summary.elapsed_secs,
            "Crawl run finished"
        );
        Ok(summary)
    }
}

fn elapsed_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).round() / 1000.0
}
