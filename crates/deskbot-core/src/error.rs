//! Error types for DeskBot.

use thiserror::Error;

/// Convenience alias used across all DeskBot crates.
pub type Result<T> = std::result::Result<T, DeskBotError>;

#[derive(Debug, Error)]
pub enum DeskBotError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Telegram error: {0}")]
    Telegram(String),

    /// Telegram rejected an edit because the submitted text and markup
    /// match what the message already contains.
    #[error("Telegram rejected edit: message is not modified")]
    EditNotModified,

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
