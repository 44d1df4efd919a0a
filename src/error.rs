//! Error types for the price tracker core.
//!
//! Callers see [`TrackerError::Validation`] for bad input and
//! [`TrackerError::Storage`] when the local store rejects a write; in the
//! latter case the write is undone in memory. Remote and cache-corruption
//! errors are logged and degraded to best-effort results by the components
//! that encounter them.

use thiserror::Error;

/// Errors produced by the price tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Input rejected before anything was persisted (bad price, empty identity, bad date).
    #[error("Validation error: {0}")]
    Validation(String),

    /// The remote store could not be reached, timed out, or is cooling down.
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    /// A persisted cache blob could not be parsed.
    #[error("Cache corrupt under key '{key}': {reason}")]
    CacheCorrupt { key: String, reason: String },

    /// The local durable store failed.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl TrackerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        TrackerError::Validation(msg.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, TrackerError::Validation(_))
    }
}

/// Result type with the tracker error.
pub type Result<T> = std::result::Result<T, TrackerError>;
