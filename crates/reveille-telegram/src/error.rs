//! Error types for the Telegram front end.

use thiserror::Error;

/// Errors that can occur when talking to the Bot API.
#[derive(Debug, Error)]
pub enum TelegramError {
    /// Transport-level failure.
    #[error("Telegram request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The Bot API answered with ok=false.
    #[error("Telegram API error: {0}")]
    Api(String),
}
