//! Error types for memory-story

use thiserror::Error;

/// Result type alias for story operations
pub type Result<T> = std::result::Result<T, StoryError>;

/// Main error type for memory-story
#[derive(Error, Debug)]
pub enum StoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Story not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid model output: {0}")]
    Validation(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(feature = "openai")]
    Http(#[from] reqwest::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(not(feature = "openai"))]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoryError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoryError::Http(_) | StoryError::RateLimited(_) | StoryError::Llm(_)
        )
    }

    /// HTTP status code used when the error surfaces from an entry point
    pub fn status_code(&self) -> u16 {
        match self {
            StoryError::NotFound(_) => 404,
            StoryError::InvalidInput(_) => 400,
            StoryError::Unauthorized(_) => 403,
            StoryError::RateLimited(_) => 429,
            _ => 500,
        }
    }
}
