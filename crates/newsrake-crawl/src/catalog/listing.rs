//! Remote listing operation
//!
//! Opaque from the catalog's point of view: it yields an exit code and the
//! listing text.

use super::DateWindow;
use crate::error::Result;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

/// Placeholder replaced by `YYYY/MM/` when listing month by month
pub const PREFIX_PLACEHOLDER: &str = "{prefix}";

/// Default CC-NEWS listing; anonymous access to the public bucket
pub const DEFAULT_LISTING_COMMAND: &str =
    "aws s3 ls --recursive s3://commoncrawl/crawl-data/CC-NEWS/ --no-sign-request";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingOutput {
    pub exit_code: i32,
    pub text: String,
}

#[async_trait]
pub trait ListingRunner: Send + Sync {
    async fn list(&self, window: &DateWindow) -> Result<ListingOutput>;
}

/// Runs a shell command and captures its stdout
#[derive(Debug, Clone)]
pub struct ShellListing {
    template: String,
}

impl ShellListing {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Concrete commands for a window: one per month when the template
    /// contains the prefix placeholder, otherwise the template itself
    pub fn commands(&self, window: &DateWindow) -> Vec<String> {
        if self.template.contains(PREFIX_PLACEHOLDER) {
            window
                .month_prefixes()
                .iter()
                .map(|prefix| self.template.replace(PREFIX_PLACEHOLDER, prefix))
                .collect()
        } else {
            vec![self.template.clone()]
        }
    }

    async fn run_one(command: &str) -> Result<ListingOutput> {
        debug!(command = %command, "Running catalog listing");
        let output = Command::new("sh").arg("-c").arg(command).output().await?;

        let exit_code = output.status.code().unwrap_or(-1);
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        if exit_code != 0 {
            text.push_str(&String::from_utf8_lossy(&output.stderr));
        }
        Ok(ListingOutput { exit_code, text })
    }
}

impl Default for ShellListing {
    fn default() -> Self {
        Self::new(DEFAULT_LISTING_COMMAND)
    }
}

#[async_trait]
impl ListingRunner for ShellListing {
    async fn list(&self, window: &DateWindow) -> Result<ListingOutput> {
        let commands = self.commands(window);
        info!(commands = commands.len(), "Listing remote catalog");

        let mut combined = String::new();
        for command in &commands {
            let output = Self::run_one(command).await?;
            if output.exit_code != 0 {
                return Ok(output);
            }
            combined.push_str(&output.text);
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
        }

        Ok(ListingOutput {
            exit_code: 0,
            text: combined,
        })
    }
}
