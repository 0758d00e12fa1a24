//! Engine client abstraction.
//!
//! An [`IndexClient`] is bound to one physical index. Clients are built by an
//! [`EngineConnector`] from serializable [`ClientParams`], which is what a
//! batch task carries instead of a live connection.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use hub_types::{ClientParams, Document};

use crate::error::SearchError;

/// Result of a bulk write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkOutcome {
    /// Documents the engine accepted
    pub count: u64,
    /// Per-document failures as reported by the engine
    pub errors: Vec<Value>,
}

impl BulkOutcome {
    pub fn combine(mut self, other: BulkOutcome) -> Self {
        self.count += other.count;
        self.errors.extend(other.errors);
        self
    }
}

/// Snapshot progress as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotState {
    Init,
    Started,
    InProgress,
    Success,
    Failed,
    Partial,
    Other(String),
}

impl SnapshotState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "INIT" => SnapshotState::Init,
            "STARTED" => SnapshotState::Started,
            "IN_PROGRESS" => SnapshotState::InProgress,
            "SUCCESS" => SnapshotState::Success,
            "FAILED" => SnapshotState::Failed,
            "PARTIAL" => SnapshotState::Partial,
            other => SnapshotState::Other(other.to_string()),
        }
    }

    /// Whether the snapshot is still running.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            SnapshotState::Init | SnapshotState::Started | SnapshotState::InProgress
        )
    }
}

impl std::fmt::Display for SnapshotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotState::Init => write!(f, "INIT"),
            SnapshotState::Started => write!(f, "STARTED"),
            SnapshotState::InProgress => write!(f, "IN_PROGRESS"),
            SnapshotState::Success => write!(f, "SUCCESS"),
            SnapshotState::Failed => write!(f, "FAILED"),
            SnapshotState::Partial => write!(f, "PARTIAL"),
            SnapshotState::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Operations on one index.
#[async_trait]
pub trait IndexClient: Send + Sync {
    fn index_name(&self) -> &str;

    /// Create the index. `settings` is merged over shard/replica counts.
    async fn create_index(&self, mapping: &Value, settings: &Value) -> Result<(), SearchError>;

    async fn index_exists(&self) -> Result<bool, SearchError>;

    async fn delete_index(&self) -> Result<(), SearchError>;

    /// Write documents with overwrite semantics. Each document carries its `_id`.
    async fn bulk_index(&self, docs: Vec<Document>) -> Result<BulkOutcome, SearchError>;

    /// Fetch indexed documents by id, with `_id` set. Missing ids are skipped.
    async fn mget(&self, ids: &[String]) -> Result<Vec<Document>, SearchError>;

    /// Report, in input order, whether each id is indexed.
    async fn exists_bulk(&self, ids: &[String]) -> Result<Vec<(String, bool)>, SearchError>;

    async fn count(&self) -> Result<u64, SearchError>;

    /// Start a snapshot of this index. `purge` deletes a same-named snapshot first.
    async fn snapshot_create(
        &self,
        repository: &str,
        snapshot: &str,
        purge: bool,
    ) -> Result<Value, SearchError>;

    async fn snapshot_status(
        &self,
        repository: &str,
        snapshot: &str,
    ) -> Result<SnapshotState, SearchError>;

    /// The mapping `_meta` object, `Value::Null` when unset.
    async fn get_mapping_meta(&self) -> Result<Value, SearchError>;

    async fn update_mapping_meta(&self, meta: &Value) -> Result<(), SearchError>;

    /// Repository settings as registered in the engine.
    async fn get_repository(&self, repository: &str) -> Result<Value, SearchError>;
}

/// Builds index clients from serializable parameters.
pub trait EngineConnector: Send + Sync {
    fn client(&self, params: &ClientParams) -> Result<Arc<dyn IndexClient>, SearchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_state_parsing() {
        assert!(SnapshotState::parse("INIT").is_pending());
        assert!(SnapshotState::parse("STARTED").is_pending());
        assert!(SnapshotState::parse("IN_PROGRESS").is_pending());
        assert!(!SnapshotState::parse("SUCCESS").is_pending());
        assert!(!SnapshotState::parse("PARTIAL").is_pending());
        assert_eq!(
            SnapshotState::parse("ABORTED"),
            SnapshotState::Other("ABORTED".into())
        );
        assert_eq!(SnapshotState::InProgress.to_string(), "IN_PROGRESS");
    }

    #[test]
    fn test_bulk_outcome_combine() {
        let a = BulkOutcome {
            count: 3,
            errors: vec![json!({"_id": "x"})],
        };
        let b = BulkOutcome {
            count: 2,
            errors: vec![],
        };
        let c = a.combine(b);
        assert_eq!(c.count, 5);
        assert_eq!(c.errors.len(), 1);
    }
}
