//! Small filesystem helpers shared by the checkpoint store and report writer.

use std::path::Path;

use crate::error::{HarvestError, Result};

/// Write `bytes` to `path` via a temporary sibling file plus atomic rename,
/// so concurrent readers never observe a partially written artifact.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| HarvestError::validation(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;

    let file_name = path
        .file_name()
        .ok_or_else(|| HarvestError::validation(format!("{} has no file name", path.display())))?
        .to_string_lossy();
    let tmp = parent.join(format!(".{file_name}.tmp"));

    std::fs::write(&tmp, bytes).map_err(|e| HarvestError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| HarvestError::io(path, e))?;
    Ok(())
}
