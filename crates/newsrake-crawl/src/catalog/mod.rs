//! Remote archive catalog
//!
//! The catalog is the raw listing of archive keys. It is fetched once per run
//! (or read from a local cache), parsed into [`ArchiveDescriptor`]s and
//! filtered to a date window.

use crate::error::{CrawlError, Result};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub mod listing;

pub use listing::{ListingOutput, ListingRunner, ShellListing};

/// One parsed catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveDescriptor {
    /// Key relative to the archive base URL
    pub remote_path: String,
    pub timestamp: Option<NaiveDateTime>,
    pub sequence_ordinal: Option<u32>,
}

impl ArchiveDescriptor {
    pub fn from_remote_path(remote_path: impl Into<String>) -> Self {
        let remote_path = remote_path.into();
        let parsed = parse_archive_name(file_name(&remote_path));
        Self {
            timestamp: parsed.map(|(ts, _)| ts),
            sequence_ordinal: parsed.map(|(_, seq)| seq),
            remote_path,
        }
    }

    pub fn file_name(&self) -> &str {
        file_name(&self.remote_path)
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.timestamp.map(|ts| ts.date())
    }

    /// Public download URL; also the identifier recorded in the ledger
    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            self.remote_path.trim_start_matches('/')
        )
    }

    /// Remote path without the archive extension, used as checkpoint directory
    pub fn output_key(&self) -> String {
        let path = self.remote_path.trim_start_matches('/');
        let name_start = path.rfind('/').map_or(0, |i| i + 1);
        match path[name_start..].find('.') {
            Some(dot) if dot > 0 => path[..name_start + dot].to_string(),
            _ => path.to_string(),
        }
    }

    pub fn is_gzip(&self) -> bool {
        self.remote_path.ends_with(".gz")
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parse `PREFIX-YYYYMMDDHHMMSS-NNNNN.ext` into timestamp and sequence ordinal
///
/// ```
/// use newsrake_crawl::catalog::parse_archive_name;
///
/// let (ts, seq) = parse_archive_name("CC-NEWS-20160911145202-00018.warc.gz").unwrap();
/// assert_eq!(ts.to_string(), "2016-09-11 14:52:02");
/// assert_eq!(seq, 18);
/// ```
pub fn parse_archive_name(name: &str) -> Option<(NaiveDateTime, u32)> {
    let (stem, ext) = name.split_once('.')?;
    if ext.is_empty() {
        return None;
    }

    let mut parts = stem.rsplitn(3, '-');
    let sequence = parts.next()?;
    let timestamp = parts.next()?;
    let prefix = parts.next()?;

    let all_digits = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| b.is_ascii_digit());
    if prefix.is_empty() || !all_digits(timestamp, 14) || !all_digits(sequence, 5) {
        return None;
    }

    let timestamp = NaiveDateTime::parse_from_str(timestamp, "%Y%m%d%H%M%S").ok()?;
    Some((timestamp, sequence.parse().ok()?))
}

/// First day covered by the CC-NEWS collection
pub fn source_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2016, 8, 26).unwrap_or(NaiveDate::MIN)
}

/// Inclusive date window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub min: NaiveDate,
    pub max: NaiveDate,
}

impl DateWindow {
    /// Absent bounds default to the source start date and today (UTC)
    pub fn new(min: Option<NaiveDate>, max: Option<NaiveDate>) -> Self {
        Self {
            min: min.unwrap_or_else(source_start_date),
            max: max.unwrap_or_else(|| Utc::now().date_naive()),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.min <= date && date <= self.max
    }

    /// `YYYY/MM/` listing prefixes for every month touched by the window
    pub fn month_prefixes(&self) -> Vec<String> {
        use chrono::Datelike;

        let mut prefixes = Vec::new();
        let (mut year, mut month) = (self.min.year(), self.min.month());
        let end = (self.max.year(), self.max.month());
        while (year, month) <= end {
            prefixes.push(format!("{:04}/{:02}/", year, month));
            if month == 12 {
                year += 1;
                month = 1;
            } else {
                month += 1;
            }
        }
        prefixes
    }
}

/// Raw parsed listing
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<ArchiveDescriptor>,
}

impl Catalog {
    /// One key per non-blank line; for `aws s3 ls` style rows the key is the
    /// last whitespace-separated token
    pub fn parse(listing: &str) -> Self {
        let entries = listing
            .lines()
            .filter_map(|line| line.split_whitespace().last())
            .map(ArchiveDescriptor::from_remote_path)
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[ArchiveDescriptor] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Archives with the given suffix whose parsed date falls in `window`
    ///
    /// Entries with unparsable names are dropped here.
    pub fn filter(&self, window: &DateWindow, suffix: &str) -> Vec<ArchiveDescriptor> {
        self.entries
            .iter()
            .filter(|entry| entry.remote_path.ends_with(suffix))
            .filter(|entry| entry.date().is_some_and(|date| window.contains(date)))
            .cloned()
            .collect()
    }
}

/// Fetches the catalog, preferring a local cache
pub struct CatalogIndex {
    runner: Arc<dyn ListingRunner>,
    archive_suffix: String,
}

impl CatalogIndex {
    pub fn new(runner: Arc<dyn ListingRunner>, archive_suffix: impl Into<String>) -> Self {
        Self {
            runner,
            archive_suffix: archive_suffix.into(),
        }
    }

    /// Archives dated within `[min, max]`
    ///
    /// A present cache file is authoritative. Otherwise the listing runs and
    /// its raw output is written to the cache path before parsing.
    #[instrument(skip(self))]
    pub async fn fetch(
        &self,
        min_date: Option<NaiveDate>,
        max_date: Option<NaiveDate>,
        cache_path: Option<&Path>,
    ) -> Result<Vec<ArchiveDescriptor>> {
        let window = DateWindow::new(min_date, max_date);
        let catalog = self.load(&window, cache_path).await?;
        let selected = catalog.filter(&window, &self.archive_suffix);

        info!(
            catalog_size = catalog.len(),
            selected = selected.len(),
            min = %window.min,
            max = %window.max,
            "Catalog filtered to date window"
        );
        Ok(selected)
    }

    /// Raw catalog from cache or listing
    pub async fn load(&self, window: &DateWindow, cache_path: Option<&Path>) -> Result<Catalog> {
        if let Some(path) = cache_path {
            match tokio::fs::read_to_string(path).await {
                Ok(text) => {
                    info!(cache = %path.display(), "Using cached catalog listing");
                    return Ok(Catalog::parse(&text));
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => return Err(e.into()),
            }
        }

        let output = self.runner.list(window).await?;
        if output.exit_code != 0 {
            return Err(CrawlError::Catalog {
                exit_code: output.exit_code,
                output: output.text,
            });
        }

        if let Some(path) = cache_path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            if let Err(e) = tokio::fs::write(path, &output.text).await {
                warn!(cache = %path.display(), error = %e, "Failed to persist catalog cache");
            } else {
                info!(cache = %path.display(), "Catalog listing cached");
            }
        }

        Ok(Catalog::parse(&output.text))
    }
}
