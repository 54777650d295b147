//! Durable run state.
//!
//! The checkpoint is one JSON file per scope under the output directory.
//! It records which items reached a terminal state and the full per-item
//! stage results, so an interrupted run resumes without repeating work.
//! Saves go through a temp-file rename so a crash mid-write never corrupts
//! the previous checkpoint.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use wikiharvest_shared::{
    CHECKPOINT_SCHEMA_VERSION, HarvestError, ItemRecord, Result, fsutil,
};

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Persisted state of one scope's runs.
///
/// Every field defaults so older or hand-edited files still load; unknown
/// fields are ignored on read and dropped on the next save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Format version for future migrations.
    #[serde(default)]
    pub schema_version: u32,
    /// Scope this checkpoint belongs to.
    #[serde(default)]
    pub scope: String,
    /// When the checkpoint was first created.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// When the checkpoint was last saved.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Items that reached a terminal state (all stages done, ok or failed).
    #[serde(default)]
    pub processed_ids: BTreeSet<String>,
    /// Per-item stage results, including partial records for items that
    /// were interrupted mid-pipeline.
    #[serde(default)]
    pub records: BTreeMap<String, ItemRecord>,
}

impl Checkpoint {
    /// Fresh checkpoint for `scope`.
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            scope: scope.into(),
            created_at: Some(Utc::now()),
            updated_at: None,
            processed_ids: BTreeSet::new(),
            records: BTreeMap::new(),
        }
    }

    /// Whether `item_id` already reached a terminal state.
    pub fn is_processed(&self, item_id: &str) -> bool {
        self.processed_ids.contains(item_id)
    }

    /// Store or replace the full record for an item. Does not mark the item
    /// processed; partial records survive interruption this way.
    pub fn upsert_record(&mut self, record: ItemRecord) {
        self.records.insert(record.item_id.clone(), record);
    }

    /// Mark an item as terminally processed.
    pub fn mark_processed(&mut self, item_id: impl Into<String>) {
        self.processed_ids.insert(item_id.into());
    }

    /// Prior record for an item, if any (possibly partial).
    pub fn record_for(&self, item_id: &str) -> Option<&ItemRecord> {
        self.records.get(item_id)
    }

    /// Stamp the last-saved time. Called by the store right before a save
    /// so an untouched checkpoint is never rewritten.
    fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

/// Loads and saves the checkpoint file for one scope.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Store for `scope` under `output_dir`.
    pub fn for_scope(output_dir: &Path, scope: &str) -> Self {
        Self {
            path: output_dir.join(format!("{scope}_checkpoint.json")),
        }
    }

    /// Store at an explicit path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the checkpoint, or start fresh if the file does not exist.
    /// A present-but-unreadable file is an error, not a silent restart.
    pub fn load(&self, scope: &str) -> Result<Checkpoint> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no checkpoint, starting fresh");
            return Ok(Checkpoint::new(scope));
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| HarvestError::io(&self.path, e))?;

        let checkpoint: Checkpoint = serde_json::from_str(&content).map_err(|e| {
            HarvestError::Checkpoint(format!(
                "failed to parse {}: {e}",
                self.path.display()
            ))
        })?;

        info!(
            path = %self.path.display(),
            processed = checkpoint.processed_ids.len(),
            records = checkpoint.records.len(),
            "checkpoint loaded"
        );
        Ok(checkpoint)
    }

    /// Persist the checkpoint atomically (write temp sibling, then rename).
    pub fn save(&self, checkpoint: &mut Checkpoint) -> Result<()> {
        checkpoint.touch();

        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| HarvestError::Checkpoint(format!("serialization failed: {e}")))?;

        fsutil::write_atomic(&self.path, json.as_bytes())?;
        debug!(path = %self.path.display(), processed = checkpoint.processed_ids.len(), "checkpoint saved");
        Ok(())
    }
}
