//! Newsrake - CC-NEWS crawl worker

use anyhow::Result;
use clap::Parser;
use newsrake_common::logging::{init_logging, LogConfig, LogLevel};
use newsrake_crawl::config::{parse_date, split_list, CrawlConfig};
use newsrake_crawl::pipeline::Crawler;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "newsrake")]
#[command(author, version, about = "Resumable CC-NEWS archive crawler")]
struct Cli {
    /// Archives processed concurrently
    #[arg(short, long)]
    workers: Option<usize>,

    /// Checkpoint destination (directory or s3://bucket/prefix)
    #[arg(short, long)]
    destination: Option<String>,

    /// Completion ledger path
    #[arg(short, long)]
    ledger: Option<PathBuf>,

    /// Stop each archive after its first checkpoint
    #[arg(long)]
    stop_early: bool,

    /// First archive date to include (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    min_date: Option<chrono::NaiveDate>,

    /// Last archive date to include (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    max_date: Option<chrono::NaiveDate>,

    /// Catalog listing cache file
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Accepted records per checkpoint batch
    #[arg(long)]
    flush_every: Option<usize>,

    /// Worker identity (defaults to the hostname)
    #[arg(long)]
    identity: Option<String>,

    /// Comma-separated worker identities sharing the catalog
    #[arg(long)]
    roster: Option<String>,

    /// Comma-separated hosts to keep (subdomains included)
    #[arg(long)]
    valid_hosts: Option<String>,

    /// Keep processing an archive after unexpected extractor errors
    #[arg(long)]
    continue_after_error: bool,

    /// Reprocess archives the ledger already marks completed
    #[arg(long)]
    ignore_ledger: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(self, config: &mut CrawlConfig) {
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(destination) = self.destination {
            config.destination = destination;
        }
        if let Some(ledger) = self.ledger {
            config.ledger_path = ledger;
        }
        if self.stop_early {
            config.stop_early = true;
        }
        if self.min_date.is_some() {
            config.min_date = self.min_date;
        }
        if self.max_date.is_some() {
            config.max_date = self.max_date;
        }
        if self.cache.is_some() {
            config.cache_path = self.cache;
        }
        if let Some(flush_every) = self.flush_every {
            config.flush_every = flush_every;
        }
        if self.identity.is_some() {
            config.identity = self.identity;
        }
        if let Some(roster) = self.roster {
            config.roster = split_list(&roster);
        }
        if let Some(hosts) = self.valid_hosts {
            config.valid_hosts = split_list(&hosts);
        }
        if self.continue_after_error {
            config.continue_after_error = true;
        }
        if self.ignore_ledger {
            config.continue_process = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("newsrake")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = CrawlConfig::from_env()?;
    cli.apply(&mut config);
    config.validate()?;

    let crawler = Crawler::from_config(config).await?;
    info!(identity = %crawler.identity(), "Starting crawl");

    let summary = crawler.run().await?;
    info!(
        completed = summary.stats.archives_completed,
        failed = summary.stats.archives_failed,
        planned = summary.planned,
        "Crawl complete"
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "newsrake",
            "--workers",
            "3",
            "--min-date",
            "2021-06-01",
            "--roster",
            "a,b",
            "--ignore-ledger",
            "--stop-early",
        ]);
        let mut config = CrawlConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.workers, 3);
        assert_eq!(config.min_date, chrono::NaiveDate::from_ymd_opt(2021, 6, 1));
        assert_eq!(config.roster, vec!["a", "b"]);
        assert!(!config.continue_process);
        assert!(config.stop_early);
    }

    #[test]
    fn test_cli_rejects_bad_date() {
        assert!(Cli::try_parse_from(["newsrake", "--max-date", "June"]).is_err());
    }
}
