//! Report artifacts and page export for wikiharvest.

pub mod export;
pub mod render;

pub use export::{ExportStats, OverwritePolicy, export_pages, sanitize_filename};
pub use render::ReportWriter;
