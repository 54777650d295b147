//! Report rendering.
//!
//! Both artifacts are regenerated wholesale from the work tree plus the
//! current checkpoint state at every batch boundary, and written through an
//! atomic replace so outside readers never see a half-written report. Items
//! not yet processed still appear, marked pending, so a long run stays
//! observable.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use wikiharvest_checkpoint::Checkpoint;
use wikiharvest_shared::{ItemRecord, Result, fsutil};
use wikiharvest_worktree::WorkTree;

/// Items untouched for longer than this are flagged stale in the table.
const STALE_AFTER_DAYS: i64 = 365;

/// Per-item display status derived from the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemStatus {
    Pending,
    Ok,
    Failed,
}

impl ItemStatus {
    fn of(item_id: &str, checkpoint: &Checkpoint) -> Self {
        if !checkpoint.is_processed(item_id) {
            return Self::Pending;
        }
        match checkpoint.record_for(item_id) {
            Some(record) if record.has_failure() => Self::Failed,
            _ => Self::Ok,
        }
    }

    fn glyph(self) -> &'static str {
        match self {
            Self::Pending => " ",
            Self::Ok => "x",
            Self::Failed => "!",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ok => "ok",
            Self::Failed => "failed",
        }
    }
}

/// Renders and writes the per-scope report artifacts.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    scope: String,
    md_path: PathBuf,
    json_path: PathBuf,
}

impl ReportWriter {
    /// Writer for `scope` under `output_dir`.
    pub fn for_scope(output_dir: &Path, scope: &str) -> Self {
        Self {
            scope: scope.to_string(),
            md_path: output_dir.join(format!("{scope}_report.md")),
            json_path: output_dir.join(format!("{scope}_report.json")),
        }
    }

    pub fn md_path(&self) -> &Path {
        &self.md_path
    }

    pub fn json_path(&self) -> &Path {
        &self.json_path
    }

    /// Render both artifacts and atomically replace them on disk.
    pub fn write(&self, tree: &WorkTree, checkpoint: &Checkpoint) -> Result<()> {
        let markdown = self.render_markdown(tree, checkpoint);
        fsutil::write_atomic(&self.md_path, markdown.as_bytes())?;

        let json = self.render_json(tree, checkpoint);
        let pretty = serde_json::to_string_pretty(&json)
            .map_err(|e| wikiharvest_shared::HarvestError::parse(e.to_string()))?;
        fsutil::write_atomic(&self.json_path, pretty.as_bytes())?;

        debug!(md = %self.md_path.display(), json = %self.json_path.display(), "report written");
        Ok(())
    }

    /// Human-readable report: indented tree plus a metadata table.
    pub fn render_markdown(&self, tree: &WorkTree, checkpoint: &Checkpoint) -> String {
        let mut out = String::new();
        let (processed, failed) = counts(tree, checkpoint);

        out.push_str(&format!("# Harvest report: {}\n\n", self.scope));
        out.push_str(&format!(
            "{} items, {} processed, {} failed, {} pending\n\n",
            tree.len(),
            processed,
            failed,
            tree.len() - processed
        ));

        out.push_str("## Tree\n\n");
        for id in tree.preorder() {
            let item = match tree.get(id) {
                Some(item) => item,
                None => continue,
            };
            let status = ItemStatus::of(id, checkpoint);
            let indent = "  ".repeat(tree.depth(id));
            out.push_str(&format!("{indent}- [{}] {}\n", status.glyph(), item.title));
        }

        out.push_str("\n## Items\n\n");
        out.push_str("| Title | Status | Version | Created | Last Updated | Updated By |\n");
        out.push_str("| --- | --- | --- | --- | --- | --- |\n");
        for id in tree.preorder() {
            let item = match tree.get(id) {
                Some(item) => item,
                None => continue,
            };
            let status = ItemStatus::of(id, checkpoint);
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} |\n",
                escape_cell(&item.title),
                status.label(),
                item.version.map_or(String::from("-"), |v| v.to_string()),
                date_cell(item.created_at, false),
                date_cell(item.updated_at, true),
                item.updated_by.as_deref().unwrap_or("-"),
            ));
        }

        out
    }

    /// Machine-readable report: the tree with per-item stage statuses.
    pub fn render_json(&self, tree: &WorkTree, checkpoint: &Checkpoint) -> serde_json::Value {
        let (processed, failed) = counts(tree, checkpoint);

        let roots: Vec<serde_json::Value> = tree
            .roots()
            .iter()
            .map(|id| item_node(tree, checkpoint, id))
            .collect();

        serde_json::json!({
            "scope": self.scope,
            "summary": {
                "total": tree.len(),
                "processed": processed,
                "failed": failed,
            },
            "tree": roots,
        })
    }
}

fn counts(tree: &WorkTree, checkpoint: &Checkpoint) -> (usize, usize) {
    let mut processed = 0;
    let mut failed = 0;
    for item in tree.iter() {
        match ItemStatus::of(&item.id, checkpoint) {
            ItemStatus::Pending => {}
            ItemStatus::Ok => processed += 1,
            ItemStatus::Failed => {
                processed += 1;
                failed += 1;
            }
        }
    }
    (processed, failed)
}

fn item_node(tree: &WorkTree, checkpoint: &Checkpoint, id: &str) -> serde_json::Value {
    let item = tree.get(id);
    let status = ItemStatus::of(id, checkpoint);
    let stages = checkpoint.record_for(id).map(stage_statuses);

    let children: Vec<serde_json::Value> = tree
        .children_of(id)
        .iter()
        .map(|child| item_node(tree, checkpoint, child))
        .collect();

    serde_json::json!({
        "id": id,
        "title": item.map(|i| i.title.as_str()).unwrap_or(""),
        "status": status.label(),
        "version": item.and_then(|i| i.version),
        "updated_by": item.and_then(|i| i.updated_by.clone()),
        "updated_at": item.and_then(|i| i.updated_at),
        "stages": stages,
        "children": children,
    })
}

fn stage_statuses(record: &ItemRecord) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = record
        .stages
        .iter()
        .map(|(name, result)| {
            (
                name.clone(),
                serde_json::to_value(result.status)
                    .unwrap_or(serde_json::Value::Null),
            )
        })
        .collect();
    serde_json::Value::Object(map)
}

/// Format a date cell; stale last-updated dates are bolded to stand out.
fn date_cell(date: Option<DateTime<Utc>>, flag_stale: bool) -> String {
    match date {
        None => "-".to_string(),
        Some(d) => {
            let formatted = d.format("%Y-%m-%d").to_string();
            if flag_stale && Utc::now() - d > Duration::days(STALE_AFTER_DAYS) {
                format!("**{formatted}**")
            } else {
                formatted
            }
        }
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}
