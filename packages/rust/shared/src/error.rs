//! Error types for wikiharvest.
//!
//! Library crates use [`HarvestError`] via `thiserror`.
//! The CLI app wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all wikiharvest operations.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error that is not worth retrying (4xx, bad response shape).
    #[error("network error: {0}")]
    Network(String),

    /// Retry budget spent without a successful response.
    #[error("call failed after {attempts} attempts")]
    Exhausted { attempts: u32 },

    /// Checkpoint load/save error.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Enrichment service error (health check, generate call, response shape).
    #[error("enrichment error: {0}")]
    Enrichment(String),

    /// Markup parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (empty item set, invalid identifier, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, HarvestError>;

impl HarvestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error maps to a recoverable item-stage failure rather
    /// than a run-level abort.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Exhausted { .. } | Self::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = HarvestError::config("missing base URL");
        assert_eq!(err.to_string(), "config error: missing base URL");

        let err = HarvestError::Exhausted { attempts: 5 };
        assert_eq!(err.to_string(), "call failed after 5 attempts");
    }

    #[test]
    fn exhausted_is_recoverable() {
        assert!(HarvestError::Exhausted { attempts: 5 }.is_recoverable());
        assert!(!HarvestError::config("x").is_recoverable());
        assert!(!HarvestError::Checkpoint("y".into()).is_recoverable());
    }
}
