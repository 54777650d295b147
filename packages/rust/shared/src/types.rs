//! Core domain types for the wikiharvest pipeline.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version for the checkpoint format.
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// One unit of work: a page/document in the remote content tree.
///
/// Immutable once enumerated by the work-tree builder within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Unique identifier assigned by the upstream service.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Ancestor identifiers, furthest first (the immediate parent is last),
    /// as the upstream listing API returns them.
    #[serde(default)]
    pub ancestors: Vec<String>,
    /// Label/tag names attached to the item, used for filtering.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Item type reported upstream (e.g., `page`, `blogpost`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    /// Current version number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Display name of the last editor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    /// When the item was created upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// When the item was last updated upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Item {
    /// The immediate parent id as reported upstream, if any.
    pub fn immediate_parent(&self) -> Option<&str> {
        self.ancestors.last().map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// StageResult
// ---------------------------------------------------------------------------

/// Outcome classification for one pipeline stage on one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage produced a usable payload.
    Ok,
    /// Stage precondition failed; no call was made.
    Skipped,
    /// Stage failed after retries; payload is an error sentinel.
    Failed,
}

/// Output of one pipeline stage for one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Outcome classification.
    pub status: StageStatus,
    /// Stage output text. For `Skipped`/`Failed` this is a sentinel that is
    /// still fed verbatim into the next stage's input.
    pub output: String,
    /// Structured payload parsed from the output, for stages that are
    /// expected to return JSON. `None` when parsing failed (recorded, never
    /// fatal).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
}

impl StageResult {
    /// A successful text result.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Ok,
            output: output.into(),
            json: None,
        }
    }

    /// A successful result carrying a parsed JSON payload.
    pub fn ok_json(output: impl Into<String>, json: Option<serde_json::Value>) -> Self {
        Self {
            status: StageStatus::Ok,
            output: output.into(),
            json,
        }
    }

    /// A precondition-skip sentinel.
    pub fn skipped(reason: impl std::fmt::Display) -> Self {
        Self {
            status: StageStatus::Skipped,
            output: format!("[SKIPPED: {reason}]"),
            json: None,
        }
    }

    /// A post-retry failure sentinel.
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        Self {
            status: StageStatus::Failed,
            output: format!("[ERROR: {reason}]"),
            json: None,
        }
    }

    /// Whether the stage produced a usable payload.
    pub fn is_ok(&self) -> bool {
        self.status == StageStatus::Ok
    }
}

// ---------------------------------------------------------------------------
// ItemRecord
// ---------------------------------------------------------------------------

/// Accumulated per-item results across all stages.
///
/// Created on the first stage completion for an item and appended to as
/// later stages complete. The full record is rewritten in the checkpoint,
/// never patched in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    /// The item this record belongs to.
    pub item_id: String,
    /// Stage name → result, keyed deterministically for stable serialization.
    #[serde(default)]
    pub stages: BTreeMap<String, StageResult>,
}

impl ItemRecord {
    /// Create an empty record for `item_id`.
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            stages: BTreeMap::new(),
        }
    }

    /// Record the result of one stage.
    pub fn record(&mut self, stage: &str, result: StageResult) {
        self.stages.insert(stage.to_string(), result);
    }

    /// Look up a prior result for `stage`.
    pub fn stage(&self, stage: &str) -> Option<&StageResult> {
        self.stages.get(stage)
    }

    /// Whether any stage ended in `Failed`.
    pub fn has_failure(&self) -> bool {
        self.stages
            .values()
            .any(|r| r.status == StageStatus::Failed)
    }
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// End-of-run summary, produced even on partial/interrupted runs.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Total items in the filtered work tree.
    pub total: usize,
    /// Items processed to a terminal state this run.
    pub processed: usize,
    /// Items skipped because the checkpoint already had them.
    pub skipped: usize,
    /// Processed items with at least one failed stage.
    pub failed: usize,
    /// Whether the run was cut short by a cancellation signal.
    pub cancelled: bool,
    /// Path to the persisted checkpoint.
    pub checkpoint_path: PathBuf,
    /// Path to the human-readable report.
    pub report_md_path: PathBuf,
    /// Path to the machine-readable report.
    pub report_json_path: PathBuf,
    /// Path to the append-only error log.
    pub error_log_path: PathBuf,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_result_sentinels() {
        let skipped = StageResult::skipped("empty input");
        assert_eq!(skipped.status, StageStatus::Skipped);
        assert_eq!(skipped.output, "[SKIPPED: empty input]");

        let failed = StageResult::failed("enrichment failed after 5 attempts");
        assert_eq!(failed.status, StageStatus::Failed);
        assert!(failed.output.starts_with("[ERROR:"));
        assert!(!failed.is_ok());
    }

    #[test]
    fn item_record_accumulates_stages() {
        let mut record = ItemRecord::new("42");
        record.record("summarize", StageResult::ok("a summary"));
        record.record("extract_metadata", StageResult::failed("boom"));

        assert_eq!(record.stages.len(), 2);
        assert!(record.stage("summarize").unwrap().is_ok());
        assert!(record.has_failure());
    }

    #[test]
    fn item_record_serialization_is_deterministic() {
        let mut record = ItemRecord::new("42");
        record.record("summarize", StageResult::ok("s"));
        record.record("fetch", StageResult::ok("f"));

        let a = serde_json::to_string(&record).expect("serialize");
        let b = serde_json::to_string(&record).expect("serialize");
        assert_eq!(a, b);

        let parsed: ItemRecord = serde_json::from_str(&a).expect("deserialize");
        assert_eq!(parsed.item_id, "42");
        assert_eq!(parsed.stages.len(), 2);
    }

    #[test]
    fn item_immediate_parent() {
        let item = Item {
            id: "3".into(),
            title: "Leaf".into(),
            ancestors: vec!["1".into(), "2".into()],
            labels: vec![],
            item_type: None,
            version: None,
            updated_by: None,
            created_at: None,
            updated_at: None,
        };
        assert_eq!(item.immediate_parent(), Some("2"));
    }
}
