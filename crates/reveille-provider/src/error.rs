//! Error types for provider operations.

use thiserror::Error;

/// Errors that can occur when driving a provider CLI.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Failed to spawn or communicate with the CLI process.
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The CLI produced output that could not be interpreted.
    #[error("unparseable CLI output: {0}")]
    Parse(String),

    /// Unknown reset mode string in configuration.
    #[error("unsupported reset mode: {0:?} (expected \"rolling\" or \"clock_aligned_hour\")")]
    UnsupportedResetMode(String),
}
