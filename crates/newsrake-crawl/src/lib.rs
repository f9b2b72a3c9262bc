//! Newsrake Crawl Library
//!
//! Distributed, resumable extraction of records from the Common Crawl
//! CC-NEWS archives.
//!
//! # Pipeline
//!
//! - **catalog**: list remote archives and filter them to a date window
//! - **ledger**: append-only record of processing attempts
//! - **partition**: deterministic split of the remaining work across workers
//! - **archive**: stream one archive, extract records, write checkpoints
//! - **scheduler**: run archives over a bounded pool
//!
//! # Example
//!
//! ```no_run
//! use newsrake_crawl::{config::CrawlConfig, pipeline::Crawler};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CrawlConfig::from_env()?;
//!     config.validate()?;
//!     let summary = Crawler::from_config(config).await?.run().await?;
//!     println!("{} archives completed", summary.stats.archives_completed);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod catalog;
pub mod config;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod partition;
pub mod pipeline;
pub mod scheduler;
pub mod storage;

pub use error::{CrawlError, Result};
