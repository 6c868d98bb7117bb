//! Error types for the scheduler.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Invalid scheduler configuration, fatal at startup.
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    /// Failed to write the state file.
    #[error("failed to persist scheduler state to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to encode the state snapshot.
    #[error("failed to encode scheduler state: {0}")]
    Encode(#[from] serde_json::Error),
}
