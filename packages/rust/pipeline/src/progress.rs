//! Progress callbacks for long-running harvests.

/// Progress callback invoked by the scheduler.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each item reaches a terminal state.
    fn item_done(&self, current: usize, total: usize, title: &str);
}

/// No-op progress, used in tests and non-interactive runs.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item_done(&self, _current: usize, _total: usize, _title: &str) {}
}
