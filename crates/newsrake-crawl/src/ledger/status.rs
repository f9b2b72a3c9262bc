use super::ProcessingOutcome;
use crate::error::{CrawlError, Result};
use fs2::FileExt;
use serde_jsonlines::JsonLinesWriter;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Write side of the ledger
///
/// Appends are serialized across threads and processes by an exclusive
/// advisory lock on `<ledger>.lock`.
#[derive(Debug, Clone)]
pub struct StatusLogger {
    ledger_path: PathBuf,
    lock_path: PathBuf,
}

/// Holds the exclusive lock until dropped
struct LedgerLock {
    file: File,
}

impl LedgerLock {
    fn acquire(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        FileExt::lock_exclusive(&file)?;
        Ok(Self { file })
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl StatusLogger {
    pub fn new(ledger_path: impl Into<PathBuf>) -> Self {
        let ledger_path = ledger_path.into();
        let mut lock_path = ledger_path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            ledger_path,
            lock_path: PathBuf::from(lock_path),
        }
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    /// Append one outcome on a blocking thread
    pub async fn append(&self, outcome: ProcessingOutcome) -> Result<()> {
        let logger = self.clone();
        tokio::task::spawn_blocking(move || logger.append_blocking(&outcome))
            .await
            .map_err(|e| CrawlError::ledger(format!("ledger append task failed: {}", e)))?
    }

    /// Append one outcome and fsync before releasing the lock
    pub fn append_blocking(&self, outcome: &ProcessingOutcome) -> Result<()> {
        if let Some(parent) = self.ledger_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut line = Vec::with_capacity(256);
        {
            let mut writer = JsonLinesWriter::new(&mut line);
            writer.write(outcome)?;
            writer.flush()?;
        }

        let _lock = LedgerLock::acquire(&self.lock_path)?;

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.ledger_path)?;

        // Terminate a torn line left by a crashed writer so ours parses
        if ends_without_newline(&mut file)? {
            line.insert(0, b'\n');
        }

        file.write_all(&line)?;
        file.flush()?;
        file.sync_data()?;

        debug!(url = %outcome.url, completed = outcome.completed, "Ledger line appended");
        Ok(())
    }
}

fn ends_without_newline(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
