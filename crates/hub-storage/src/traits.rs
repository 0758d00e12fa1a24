//! Store traits consumed by the indexing pipeline.

use async_trait::async_trait;
use serde_json::Value;

use hub_types::{BuildDocument, Document, JobRecord};

use crate::error::StorageError;

/// One page of document ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdPage {
    /// Raw `_id` values as stored, not yet validated
    pub ids: Vec<Value>,
    /// Cursor to pass to the next call, `None` on the last page
    pub next: Option<String>,
}

/// Read access to the primary datastore.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the documents with the given ids. Missing ids are skipped.
    async fn fetch(&self, collection: &str, ids: &[String]) -> Result<Vec<Document>, StorageError>;

    /// Page through ids in ascending order, starting after `cursor`.
    async fn page_ids(
        &self,
        collection: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<IdPage, StorageError>;

    async fn count(&self, collection: &str) -> Result<u64, StorageError>;
}

/// The build-tracking store.
#[async_trait]
pub trait BuildStore: Send + Sync {
    async fn find_one(&self, id: &str) -> Result<Option<BuildDocument>, StorageError>;

    /// Append a job record to a build's job log.
    async fn push_job(&self, id: &str, job: JobRecord) -> Result<(), StorageError>;

    /// Replace the whole document, inserting it if absent.
    async fn replace(&self, doc: &BuildDocument) -> Result<(), StorageError>;
}

/// Read the `_id` of a document, if any.
pub(crate) fn document_id(doc: &Document) -> Result<&Value, StorageError> {
    doc.get("_id")
        .ok_or_else(|| StorageError::Key("document has no _id".to_string()))
}
