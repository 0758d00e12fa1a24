//! Error types for the indexing pipeline.

use hub_scheduler::SchedulerError;
use hub_search::SearchError;
use hub_storage::StorageError;
use hub_types::HubError;
use thiserror::Error;

/// Errors that can occur while indexing, snapshotting or publishing.
#[derive(Error, Debug)]
pub enum IndexerError {
    /// Missing build document, doc type, environment or indexer kind
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The target index exists and the mode does not allow reusing it
    #[error("Index '{index}' already exists (mode: {mode})")]
    IndexCollision { index: String, mode: String },

    /// Search engine client failure
    #[error("Engine error: {0}")]
    Engine(#[from] SearchError),

    /// A batch failed or its worker terminated without a result
    #[error("Batch #{batch} failed: {reason}")]
    BatchFailure { batch: usize, reason: String },

    /// Snapshot ended in a non-success state
    #[error("Snapshot '{snapshot}' failed with state {state}")]
    SnapshotFailure { snapshot: String, state: String },

    /// Role or version-stamp guard refused to publish
    #[error("Publish refused: {0}")]
    PublishPrecondition(String),

    /// Post-index hook failed
    #[error("Post-index step failed: {0}")]
    PostIndex(String),

    /// Post-publish hook failed
    #[error("Post-publish step failed: {0}")]
    PostPublish(String),

    /// Build or document store failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Job manager failure
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Filesystem failure (failure dumps, release metadata)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for IndexerError {
    fn from(err: serde_json::Error) -> Self {
        IndexerError::Serialization(err.to_string())
    }
}

impl From<HubError> for IndexerError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Serialization(e) => IndexerError::Serialization(e.to_string()),
            other => IndexerError::Configuration(other.to_string()),
        }
    }
}
