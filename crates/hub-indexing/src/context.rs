//! Handles shared by every indexer of a process.

use std::path::PathBuf;
use std::sync::Arc;

use hub_scheduler::JobManager;
use hub_search::EngineConnector;
use hub_storage::{BuildStore, DocumentStore};

/// Collaborators injected at start-up. Cloning shares them.
#[derive(Clone)]
pub struct IndexingContext {
    pub builds: Arc<dyn BuildStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub engine: Arc<dyn EngineConnector>,
    pub jobs: JobManager,
    /// Where failed batches dump their id list
    pub log_folder: PathBuf,
}

impl IndexingContext {
    pub fn new(
        builds: Arc<dyn BuildStore>,
        documents: Arc<dyn DocumentStore>,
        engine: Arc<dyn EngineConnector>,
        jobs: JobManager,
        log_folder: impl Into<PathBuf>,
    ) -> Self {
        Self {
            builds,
            documents,
            engine,
            jobs,
            log_folder: log_folder.into(),
        }
    }
}
