//! Page export.
//!
//! Writes each processed item's converted text into a directory hierarchy
//! mirroring its place in the work tree. Collisions with existing files are
//! resolved by an explicit overwrite policy passed per call; the policy
//! value itself never mutates mid-export.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, instrument};

use wikiharvest_checkpoint::Checkpoint;
use wikiharvest_shared::{HarvestError, Result};
use wikiharvest_worktree::WorkTree;

/// Characters not allowed in exported file and directory names.
static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/*?":<>|]"#).unwrap_or_else(|_| unreachable!()));

/// Stage whose output is the exportable page text.
const EXPORT_STAGE: &str = "fetch";

/// What to do when an export target already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    /// Replace the existing file.
    Overwrite,
    /// Leave the existing file untouched.
    Skip,
    /// Write next to it with a numeric suffix (`title_2.md`, `title_3.md`).
    Increment,
}

/// Outcome counts for one export pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub written: usize,
    pub skipped: usize,
}

/// Replace filesystem-hostile characters with underscores.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned = UNSAFE_CHARS.replace_all(name.trim(), "_").to_string();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

/// First non-existing variant of `path`, counting up from `_2`.
fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned());
    let parent = path.parent().unwrap_or(Path::new("."));

    let mut counter = 2u32;
    loop {
        let candidate = match &ext {
            Some(ext) => parent.join(format!("{stem}_{counter}.{ext}")),
            None => parent.join(format!("{stem}_{counter}")),
        };
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Export every item with fetched content under `export_root`, one file per
/// item, nested by ancestor titles.
#[instrument(skip_all, fields(root = %export_root.display(), policy = ?policy))]
pub fn export_pages(
    tree: &WorkTree,
    checkpoint: &Checkpoint,
    export_root: &Path,
    policy: OverwritePolicy,
) -> Result<ExportStats> {
    let mut stats = ExportStats::default();

    for id in tree.preorder() {
        let Some(item) = tree.get(id) else { continue };
        let Some(text) = checkpoint
            .record_for(id)
            .and_then(|r| r.stage(EXPORT_STAGE))
            .filter(|s| s.is_ok())
            .map(|s| s.output.as_str())
        else {
            continue;
        };

        let mut dir = export_root.to_path_buf();
        for ancestor in tree.ancestor_titles(id) {
            dir = dir.join(sanitize_filename(ancestor));
        }
        std::fs::create_dir_all(&dir).map_err(|e| HarvestError::io(&dir, e))?;

        let target = dir.join(format!("{}.md", sanitize_filename(&item.title)));
        let target = match policy {
            OverwritePolicy::Overwrite => target,
            OverwritePolicy::Skip => {
                if target.exists() {
                    debug!(path = %target.display(), "exists, skipping");
                    stats.skipped += 1;
                    continue;
                }
                target
            }
            OverwritePolicy::Increment => unique_path(&target),
        };

        std::fs::write(&target, text).map_err(|e| HarvestError::io(&target, e))?;
        stats.written += 1;
    }

    info!(written = stats.written, skipped = stats.skipped, "export complete");
    Ok(stats)
}
