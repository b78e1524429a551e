//! Error types for subharvest.
//!
//! Library crates use [`HarvestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Only run-fatal conditions travel as `Err`. Per-source and per-entry
//! problems are counted into [`crate::RunResult`] instead.

use std::path::PathBuf;

/// Top-level error type for all subharvest operations.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while fetching a source.
    #[error("network error: {0}")]
    Network(String),

    /// Payload could not be decoded or split.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No output artifact could be written.
    #[error("write error: {0}")]
    Write(String),

    /// Every configured source failed; prior output is left in place.
    #[error("all {attempted} sources failed, no output written")]
    AllSourcesFailed { attempted: usize },

    /// The run was cancelled before any output was written.
    #[error("run cancelled before output was written")]
    Cancelled,
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
}
