//! Shared types, configuration, and error handling for wikiharvest.

pub mod config;
pub mod errlog;
pub mod error;
pub mod fsutil;
pub mod types;

pub use config::{
    AppConfig, DefaultsConfig, EnrichmentConfig, FiltersConfig, RunConfig, WikiConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from,
    resolve_credentials,
};
pub use errlog::ErrorLog;
pub use error::{HarvestError, Result};
pub use types::{
    CHECKPOINT_SCHEMA_VERSION, Item, ItemRecord, RunId, RunSummary, StageResult, StageStatus,
};
