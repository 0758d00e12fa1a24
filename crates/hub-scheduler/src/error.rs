//! Error types for the scheduler crate.

use thiserror::Error;
use tokio::task::JoinError;

/// Errors that can occur while deferring work.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Invalid pool configuration
    #[error("Invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    /// The worker pool no longer accepts work
    #[error("Worker pool is closed")]
    Closed,

    /// The task panicked before producing a result
    #[error("Worker terminated without a result: {0}")]
    WorkerTerminated(String),

    /// The task was aborted before producing a result
    #[error("Job was cancelled")]
    Cancelled,
}

impl From<JoinError> for SchedulerError {
    fn from(err: JoinError) -> Self {
        if err.is_cancelled() {
            return SchedulerError::Cancelled;
        }
        match err.try_into_panic() {
            Ok(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                SchedulerError::WorkerTerminated(msg)
            }
            Err(err) => SchedulerError::WorkerTerminated(err.to_string()),
        }
    }
}
