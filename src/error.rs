//! Error types for Recall

use thiserror::Error;

/// Result type alias for Recall operations
pub type Result<T> = std::result::Result<T, RecallError>;

/// Main error type for Recall
#[derive(Error, Debug)]
pub enum RecallError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not initialized: {0}")]
    NotInitialized(String),

    #[error("External service unavailable: {0}")]
    External(String),

    #[error("Snapshot corrupt: {0}")]
    Corrupt(String),

    #[error("Partial ingest: {failed} of {total} sessions failed")]
    Partial { failed: usize, total: usize },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RecallError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, RecallError::External(_) | RecallError::Http(_))
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            RecallError::InvalidRequest(_) => 400,
            _ => 500,
        }
    }
}
