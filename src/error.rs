//! Sceneforge error types

use thiserror::Error;

/// Sceneforge error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (invalid keys are named in the message)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Entity storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Language model error
    #[error("Language model error: {0}")]
    LanguageModel(String),

    /// Language model call exceeded its timeout
    #[error("Language model timed out after {0:?}")]
    LanguageModelTimeout(std::time::Duration),

    /// Content fusion error
    #[error("Fusion error: {0}")]
    Fusion(String),

    /// Storyboard script parse error
    #[error("Storyboard error: {0}")]
    Storyboard(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for sceneforge operations
pub type Result<T> = std::result::Result<T, Error>;
