//! Error types for badge-engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed purchase event. Not retried.
    #[error("Invalid event: {0}")]
    Validation(String),

    /// Underlying persistence failed. The whole event must be retried.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether reprocessing the same event may succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Io(_) | Self::Internal(_))
    }
}
