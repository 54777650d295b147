//! Application configuration for wikiharvest.
//!
//! User config lives at `~/.wikiharvest/wikiharvest.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "wikiharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".wikiharvest";

// ---------------------------------------------------------------------------
// Config structs (matching wikiharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Upstream wiki connection settings.
    #[serde(default)]
    pub wiki: WikiConfig,

    /// Enrichment service settings.
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Item inclusion filters.
    #[serde(default)]
    pub filters: FiltersConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Output root for checkpoints, reports, and exports.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Concurrent items per batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Items per batch (checkpoint/report sync interval).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum stage input size before chunking, in bytes.
    #[serde(default = "default_chunk_limit")]
    pub chunk_limit: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
            chunk_limit: default_chunk_limit(),
        }
    }
}

fn default_output_dir() -> String {
    "~/wikiharvest-out".into()
}
fn default_concurrency() -> usize {
    5
}
fn default_batch_size() -> usize {
    5
}
fn default_chunk_limit() -> usize {
    4000
}

/// `[wiki]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiConfig {
    /// Base URL of the wiki REST API (e.g., `https://example.atlassian.net/wiki`).
    #[serde(default)]
    pub base_url: String,

    /// Name of the env var holding the API username (never store the value).
    #[serde(default = "default_username_env")]
    pub username_env: String,

    /// Name of the env var holding the API token (never store the value).
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username_env: default_username_env(),
            token_env: default_token_env(),
        }
    }
}

fn default_username_env() -> String {
    "WIKI_USERNAME".into()
}
fn default_token_env() -> String {
    "WIKI_API_TOKEN".into()
}

/// `[enrichment]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Base URL of the enrichment service.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model identifier passed with every generate call.
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum attempts per outbound call.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between retries, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Grow the retry delay exponentially instead of keeping it fixed.
    #[serde(default)]
    pub exponential_backoff: bool,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            exponential_backoff: false,
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost:5051".into()
}
fn default_model() -> String {
    "llama3.3".into()
}
fn default_max_attempts() -> u32 {
    5
}
fn default_retry_delay_ms() -> u64 {
    2000
}

/// `[filters]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FiltersConfig {
    /// Keep items carrying at least one of these labels (case-insensitive).
    #[serde(default)]
    pub labels: Vec<String>,

    /// Keep items whose title contains this substring (case-insensitive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_contains: Option<String>,

    /// Keep items of exactly this type (case-insensitive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime run configuration — merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Concurrent items per batch.
    pub concurrency: usize,
    /// Items per batch.
    pub batch_size: usize,
    /// Maximum stage input size before chunking.
    pub chunk_limit: usize,
    /// Maximum attempts per outbound call.
    pub max_attempts: u32,
    /// Delay between retries.
    pub retry_delay: Duration,
    /// Grow the retry delay exponentially.
    pub exponential_backoff: bool,
}

impl From<&AppConfig> for RunConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            concurrency: config.defaults.concurrency,
            batch_size: config.defaults.batch_size,
            chunk_limit: config.defaults.chunk_limit,
            max_attempts: config.enrichment.max_attempts,
            retry_delay: Duration::from_millis(config.enrichment.retry_delay_ms),
            exponential_backoff: config.enrichment.exponential_backoff,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.wikiharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.wikiharvest/wikiharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HarvestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve wiki credentials from the configured env vars.
///
/// Returns `None` when neither var is set (anonymous access).
pub fn resolve_credentials(config: &AppConfig) -> Result<Option<(String, String)>> {
    let username = std::env::var(&config.wiki.username_env).ok();
    let token = std::env::var(&config.wiki.token_env).ok();

    match (username, token) {
        (Some(u), Some(t)) if !u.is_empty() && !t.is_empty() => Ok(Some((u, t))),
        (None, None) => Ok(None),
        _ => Err(HarvestError::config(format!(
            "both {} and {} must be set for authenticated access",
            config.wiki.username_env, config.wiki.token_env
        ))),
    }
}
