//! Stage pipeline and batch scheduler.
//!
//! [`stages`] runs a single item through the fixed stage chain, [`chunker`]
//! splits oversized stage inputs, and [`scheduler`] drives whole work trees
//! through the pipeline with bounded concurrency and per-batch durability.

pub mod chunker;
pub mod progress;
pub mod scheduler;
pub mod stages;

pub use progress::{ProgressReporter, SilentProgress};
pub use scheduler::Scheduler;
pub use stages::{ItemOutcome, Stage, StagePipeline, extract_json, record_complete};
