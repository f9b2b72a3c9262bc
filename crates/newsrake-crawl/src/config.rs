//! Crawl configuration
//!
//! Defaults, overridden by `NEWSRAKE_*` environment variables, overridden by
//! command-line flags.

use crate::catalog::listing::DEFAULT_LISTING_COMMAND;
use crate::storage::{Destination, StorageConfig};
use chrono::NaiveDate;
use newsrake_common::CommonError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Public CC-NEWS download root
pub const DEFAULT_BASE_URL: &str = "https://data.commoncrawl.org/";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrawlConfig {
    /// Archive URLs are `base_url` joined with the catalog key
    pub base_url: String,
    /// Shell command printing the catalog; may contain `{prefix}`
    pub listing_command: String,
    pub archive_suffix: String,
    /// Raw listing cache; authoritative when present
    pub cache_path: Option<PathBuf>,
    pub ledger_path: PathBuf,
    /// Local directory or `s3://bucket/prefix`
    pub destination: String,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
    /// Concurrent archives on this worker
    pub workers: usize,
    /// Accepted records per checkpoint batch
    pub flush_every: usize,
    pub continue_after_error: bool,
    /// Skip archives already completed in the ledger
    pub continue_process: bool,
    pub stop_early: bool,
    /// Worker identity; hostname when unset
    pub identity: Option<String>,
    pub roster: Vec<String>,
    pub valid_hosts: Vec<String>,
    pub ignore_unicode_errors: bool,
    pub storage: StorageConfig,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            listing_command: DEFAULT_LISTING_COMMAND.to_string(),
            archive_suffix: ".warc.gz".to_string(),
            cache_path: None,
            ledger_path: PathBuf::from("./data/ledger.jsonl"),
            destination: "./data/output".to_string(),
            min_date: None,
            max_date: None,
            workers: 1,
            flush_every: 1000,
            continue_after_error: false,
            continue_process: true,
            stop_early: false,
            identity: None,
            roster: Vec::new(),
            valid_hosts: Vec::new(),
            ignore_unicode_errors: false,
            storage: StorageConfig::default(),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_list(name: &str) -> Option<Vec<String>> {
    env_string(name).map(|v| split_list(&v))
}

fn env_parse<T: std::str::FromStr>(name: &str) -> newsrake_common::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    env_string(name)
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|e| CommonError::config(format!("Invalid {}: {} ({})", name, v, e)))
        })
        .transpose()
}

/// Comma-separated list with blanks dropped
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// `YYYY-MM-DD`
pub fn parse_date(value: &str) -> newsrake_common::Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| CommonError::parse(format!("Invalid date '{}', expected YYYY-MM-DD: {}", value, e)))
}

impl CrawlConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_string("NEWSRAKE_BASE_URL") {
            config.base_url = v;
        }
        if let Some(v) = env_string("NEWSRAKE_LISTING_COMMAND") {
            config.listing_command = v;
        }
        if let Some(v) = env_string("NEWSRAKE_ARCHIVE_SUFFIX") {
            config.archive_suffix = v;
        }
        config.cache_path = env_string("NEWSRAKE_CACHE_PATH").map(PathBuf::from);
        if let Some(v) = env_string("NEWSRAKE_LEDGER_PATH") {
            config.ledger_path = PathBuf::from(v);
        }
        if let Some(v) = env_string("NEWSRAKE_DESTINATION") {
            config.destination = v;
        }
        config.min_date = env_string("NEWSRAKE_MIN_DATE")
            .map(|v| parse_date(&v))
            .transpose()?;
        config.max_date = env_string("NEWSRAKE_MAX_DATE")
            .map(|v| parse_date(&v))
            .transpose()?;
        if let Some(v) = env_parse("NEWSRAKE_WORKERS")? {
            config.workers = v;
        }
        if let Some(v) = env_parse("NEWSRAKE_FLUSH_EVERY")? {
            config.flush_every = v;
        }
        if let Some(v) = env_parse("NEWSRAKE_CONTINUE_AFTER_ERROR")? {
            config.continue_after_error = v;
        }
        if let Some(v) = env_parse("NEWSRAKE_CONTINUE_PROCESS")? {
            config.continue_process = v;
        }
        if let Some(v) = env_parse("NEWSRAKE_STOP_EARLY")? {
            config.stop_early = v;
        }
        config.identity = env_string("NEWSRAKE_WORKER_ID");
        if let Some(v) = env_list("NEWSRAKE_ROSTER") {
            config.roster = v;
        }
        if let Some(v) = env_list("NEWSRAKE_VALID_HOSTS") {
            config.valid_hosts = v;
        }
        if let Some(v) = env_parse("NEWSRAKE_IGNORE_UNICODE_ERRORS")? {
            config.ignore_unicode_errors = v;
        }
        config.storage = StorageConfig::from_env();

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            anyhow::bail!("NEWSRAKE_WORKERS must be greater than 0");
        }
        if self.flush_every == 0 {
            anyhow::bail!("NEWSRAKE_FLUSH_EVERY must be greater than 0");
        }
        if self.listing_command.trim().is_empty() {
            anyhow::bail!("NEWSRAKE_LISTING_COMMAND must not be empty");
        }
        if let (Some(min), Some(max)) = (self.min_date, self.max_date) {
            if min > max {
                anyhow::bail!("Minimum date {} is after maximum date {}", min, max);
            }
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| anyhow::anyhow!("Invalid base URL '{}': {}", self.base_url, e))?;
        Destination::parse(&self.destination)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "NEWSRAKE_WORKERS",
        "NEWSRAKE_FLUSH_EVERY",
        "NEWSRAKE_MIN_DATE",
        "NEWSRAKE_MAX_DATE",
        "NEWSRAKE_ROSTER",
        "NEWSRAKE_DESTINATION",
        "NEWSRAKE_CONTINUE_AFTER_ERROR",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_is_valid() {
        let config = CrawlConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.continue_after_error);
        assert!(config.continue_process);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        std::env::set_var("NEWSRAKE_WORKERS", "4");
        std::env::set_var("NEWSRAKE_FLUSH_EVERY", "250");
        std::env::set_var("NEWSRAKE_MIN_DATE", "2021-06-01");
        std::env::set_var("NEWSRAKE_ROSTER", "crawler-1, crawler-2");
        std::env::set_var("NEWSRAKE_DESTINATION", "s3://news/out");
        std::env::set_var("NEWSRAKE_CONTINUE_AFTER_ERROR", "true");

        let config = CrawlConfig::from_env().unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.flush_every, 250);
        assert_eq!(config.min_date, NaiveDate::from_ymd_opt(2021, 6, 1));
        assert_eq!(config.roster, vec!["crawler-1", "crawler-2"]);
        assert_eq!(config.destination, "s3://news/out");
        assert!(config.continue_after_error);
        config.validate().unwrap();

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_numbers() {
        clear_env();
        std::env::set_var("NEWSRAKE_WORKERS", "many");
        let err = CrawlConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("NEWSRAKE_WORKERS"));
        clear_env();
    }

    #[test]
    fn test_validate_rejects() {
        let config = CrawlConfig {
            workers: 0,
            ..CrawlConfig::default()
        };
        assert!(config.validate().is_err());

        let config = CrawlConfig {
            flush_every: 0,
            ..CrawlConfig::default()
        };
        assert!(config.validate().is_err());

        let config = CrawlConfig {
            min_date: NaiveDate::from_ymd_opt(2022, 1, 2),
            max_date: NaiveDate::from_ymd_opt(2022, 1, 1),
            ..CrawlConfig::default()
        };
        assert!(config.validate().is_err());

        let config = CrawlConfig {
            base_url: "not a url".into(),
            ..CrawlConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2016-08-26").unwrap(),
            NaiveDate::from_ymd_opt(2016, 8, 26).unwrap()
        );
        assert!(parse_date("26/08/2016").is_err());
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" a,,b ,"), vec!["a", "b"]);
    }
}
