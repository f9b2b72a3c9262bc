use super::ProcessingOutcome;
use crate::error::Result;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

/// Read side of the ledger
pub struct CompletionLedger;

/// One ledger line, in either the JSON or the legacy `url,status` format
#[derive(Debug, Clone, PartialEq)]
enum LedgerLine {
    Outcome(Box<ProcessingOutcome>),
    Legacy { url: String, completed: bool },
}

impl LedgerLine {
    fn parse(line: &str) -> Option<Self> {
        if line.starts_with('{') {
            return serde_json::from_str(line)
                .ok()
                .map(|outcome| Self::Outcome(Box::new(outcome)));
        }

        let (url, status) = line.rsplit_once(',')?;
        let completed = match status.trim() {
            "1" | "true" => true,
            "0" | "false" => false,
            _ => return None,
        };
        let url = url.trim();
        (!url.is_empty()).then(|| Self::Legacy {
            url: url.to_string(),
            completed,
        })
    }
}

impl CompletionLedger {
    /// URLs with at least one completed attempt
    ///
    /// A missing ledger is empty. Lines that do not parse (for example the
    /// torn tail of a crashed write) are skipped with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<HashSet<String>> {
        let mut done = HashSet::new();
        for line in read_lines(path.as_ref())? {
            match line {
                LedgerLine::Outcome(outcome) if outcome.completed => {
                    done.insert(outcome.url);
                },
                LedgerLine::Legacy {
                    url,
                    completed: true,
                } => {
                    done.insert(url);
                },
                _ => {},
            }
        }
        debug!(completed = done.len(), "Loaded completion ledger");
        Ok(done)
    }

    /// Every JSON outcome in file order; legacy lines carry no outcome
    pub fn outcomes(path: impl AsRef<Path>) -> Result<Vec<ProcessingOutcome>> {
        Ok(read_lines(path.as_ref())?
            .into_iter()
            .filter_map(|line| match line {
                LedgerLine::Outcome(outcome) => Some(*outcome),
                LedgerLine::Legacy { .. } => None,
            })
            .collect())
    }
}

fn read_lines(path: &Path) -> Result<Vec<LedgerLine>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut lines = Vec::new();
    // Split on raw bytes: a torn write may end mid UTF-8 sequence
    for (number, raw) in BufReader::new(file).split(b'\n').enumerate() {
        let raw = raw?;
        let text = String::from_utf8_lossy(&raw);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        match LedgerLine::parse(text) {
            Some(line) => lines.push(line),
            None => warn!(
                ledger = %path.display(),
                line = number + 1,
                "Skipping unparsable ledger line"
            ),
        }
    }
    Ok(lines)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ledger::StatusLogger;
    use std::io::Write;
    use tempfile::TempDir;

    fn json_line(url: &str, completed: bool) -> String {
        format!(
            r#"{{"url":"{}","completed":{},"record_count":1,"error_count":0,"host":"w1","start_ts":"2024-01-01T00:00:00Z","end_ts":"2024-01-01T00:00:05Z"}}"#,
            url, completed
        )
    }

    #[test]
    fn test_missing_ledger_is_empty() {
        let dir = TempDir::new().unwrap();
        let done = CompletionLedger::load(dir.path().join("absent.jsonl")).unwrap();
        assert!(done.is_empty());
    }

    #[test]
    fn test_any_completed_line_marks_done() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let content = [
            json_line("a", false),
            json_line("a", true),
            json_line("b", false),
            json_line("c", true),
            json_line("c", false),
        ]
        .join("\n");
        std::fs::write(&path, content).unwrap();

        let done = CompletionLedger::load(&path).unwrap();
        assert_eq!(done, HashSet::from(["a".to_string(), "c".to_string()]));
        assert_eq!(CompletionLedger::outcomes(&path).unwrap().len(), 5);
    }

    #[test]
    fn test_truncated_tail_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "{}", json_line("a", true)).unwrap();
        let torn = json_line("b", true);
        file.write_all(&torn.as_bytes()[..torn.len() / 2]).unwrap();
        file.write_all(&[0xE2, 0x82]).unwrap();
        drop(file);

        let done = CompletionLedger::load(&path).unwrap();
        assert_eq!(done, HashSet::from(["a".to_string()]));
    }

    #[test]
    fn test_legacy_csv_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.csv");
        std::fs::write(
            &path,
            format!(
                "https://x/a.warc.gz,1\nhttps://x/b.warc.gz,0\n{}\n",
                json_line("https://x/c.warc.gz", true)
            ),
        )
        .unwrap();

        let done = CompletionLedger::load(&path).unwrap();
        assert_eq!(
            done,
            HashSet::from([
                "https://x/a.warc.gz".to_string(),
                "https://x/c.warc.gz".to_string()
            ])
        );
        assert_eq!(CompletionLedger::outcomes(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_reload_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.jsonl");
        std::fs::write(&path, format!("{}\n{}\n", json_line("a", true), json_line("b", false))).unwrap();

        let first = CompletionLedger::load(&path).unwrap();
        let second = CompletionLedger::load(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_duplicate_completion_leaves_set_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.jsonl");
        std::fs::write(&path, format!("{}\n{}\n", json_line("a", true), json_line("b", false))).unwrap();
        let before = CompletionLedger::load(&path).unwrap();

        let duplicate: ProcessingOutcome = serde_json::from_str(&json_line("a", true)).unwrap();
        StatusLogger::new(&path).append_blocking(&duplicate).unwrap();

        let after = CompletionLedger::load(&path).unwrap();
        assert_eq!(before, after);
        assert_eq!(after, HashSet::from(["a".to_string()]));
        assert_eq!(CompletionLedger::outcomes(&path).unwrap().len(), 3);
    }
}
