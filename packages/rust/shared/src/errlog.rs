//! Append-only structured error log.
//!
//! One line per failed attempt: timestamp, run id, item/stage key, truncated
//! failure context. Entries append across runs, so the run id is what lets
//! post-hoc diagnosis separate one run's failures from the next. Logging
//! failure never aborts the call being logged.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::types::RunId;

/// Maximum stored failure-context length, in characters.
const CONTEXT_LIMIT: usize = 200;

/// Handle to an append-only error log file.
///
/// Cheap to clone; every append opens the file in append mode so concurrent
/// workers interleave whole lines rather than fight over a shared handle.
/// Clones share the run id minted at construction.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
    run: RunId,
}

impl ErrorLog {
    /// Create a handle for the log at `path` with a fresh run id. The file
    /// is created lazily on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            run: RunId::new(),
        }
    }

    /// Where the log lives.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The run id stamped on every appended line.
    pub fn run_id(&self) -> &RunId {
        &self.run
    }

    /// Append one failed-attempt line keyed by `item/stage`.
    ///
    /// Best-effort: failures to write are reported via `tracing` and
    /// swallowed.
    pub fn append(&self, key: &str, context: &str) {
        let line = format!(
            "[{}] [{}] [{key}] {}\n",
            Utc::now().to_rfc3339(),
            self.run,
            truncate(context, CONTEXT_LIMIT)
        );

        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));

        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "error log append failed");
        }
    }
}

/// Truncate to at most `limit` characters, on a char boundary.
fn truncate(s: &str, limit: usize) -> String {
    let flat = s.replace('\n', " ");
    if flat.chars().count() <= limit {
        return flat;
    }
    let cut: String = flat.chars().take(limit).collect();
    format!("{cut}...")
}
