//! Append-only completion ledger
//!
//! One JSON object per line, one line per processing attempt. An archive is
//! done once any of its lines has `completed = true`; lines are never
//! rewritten, so replaying a crashed run only ever adds lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod reader;
pub mod status;

pub use reader::CompletionLedger;
pub use status::StatusLogger;

/// Result of one attempt at one archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOutcome {
    pub url: String,
    /// The archive stream was consumed to its end
    pub completed: bool,
    /// Records accepted (and flushed) during this attempt
    pub record_count: u64,
    #[serde(default)]
    pub error_count: u64,
    pub host: String,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seen_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_count: Option<u64>,
    /// Transaction offset this attempt resumed from, when non-zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_line_deserializes() {
        let line = r#"{"url":"u","completed":true,"record_count":3,"host":"h","start_ts":"2024-01-01T00:00:00Z","end_ts":"2024-01-01T00:01:00Z"}"#;
        let outcome: ProcessingOutcome = serde_json::from_str(line).unwrap();
        assert!(outcome.completed);
        assert_eq!(outcome.error_count, 0);
        assert_eq!(outcome.failure, None);
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let now = Utc::now();
        let outcome = ProcessingOutcome {
            url: "u".into(),
            completed: false,
            record_count: 0,
            error_count: 0,
            host: "h".into(),
            start_ts: now,
            end_ts: now,
            seen_count: None,
            rejected_count: None,
            resumed_from: None,
            failure: None,
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(!json.contains("failure"));
        assert!(!json.contains("resumed_from"));
    }
}
