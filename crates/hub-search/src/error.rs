//! Search error types.

use thiserror::Error;

/// Errors that can occur talking to the search engine.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Transport-level failure (connection refused, timeout...)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Engine answered with an error status
    #[error("Engine returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Index not found
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    /// Snapshot or repository not found
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Engine rejected a request body
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Client construction failed
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SearchError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SearchError::Http(_) => true,
            SearchError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        SearchError::Http(err.to_string())
    }
}
