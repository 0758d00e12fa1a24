//! RocksDB wrapper for hub storage.
//!
//! Provides:
//! - Database open/close with column family setup
//! - Collection document writes via atomic write batches
//! - Prefix-scoped paging over collection ids
//! - Build document read-modify-replace

use async_trait::async_trait;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use tracing::{debug, info};

use hub_types::{BuildDocument, Document, JobRecord};

use crate::column_families::{build_cf_descriptors, ALL_CF_NAMES, CF_BUILDS, CF_DOCUMENTS};
use crate::error::StorageError;
use crate::keys::DocumentKey;
use crate::traits::{document_id, BuildStore, DocumentStore, IdPage};

/// Main storage interface for the hub
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    /// Write documents into a collection, overwriting same `_id`s.
    ///
    /// All documents are written in one batch; a document without `_id`
    /// rejects the whole call.
    pub fn put_documents(&self, collection: &str, docs: &[Document]) -> Result<usize, StorageError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let mut batch = WriteBatch::default();
        for doc in docs {
            let key = DocumentKey::for_value(collection, document_id(doc)?)?;
            batch.put_cf(cf, key.to_bytes(), serde_json::to_vec(doc)?);
        }
        self.db.write(batch)?;
        debug!(collection = %collection, count = docs.len(), "Stored documents");
        Ok(docs.len())
    }

    fn get_build(&self, id: &str) -> Result<Option<BuildDocument>, StorageError> {
        let cf = self.cf(CF_BUILDS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(BuildDocument::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_build(&self, doc: &BuildDocument) -> Result<(), StorageError> {
        let cf = self.cf(CF_BUILDS)?;
        self.db.put_cf(cf, doc.id.as_bytes(), doc.to_bytes()?)?;
        Ok(())
    }

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(cf)?;
            }
        }
        Ok(())
    }

#[async_trait]
impl DocumentStore for Storage {
    async fn fetch(&self, collection: &str, ids: &[String]) -> Result<Vec<Document>, StorageError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            let key = DocumentKey::new(collection, id.as_str())?;
            if let Some(bytes) = self.db.get_cf(cf, key.to_bytes())? {
                docs.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(docs)
    }

    async fn page_ids(
        &self,
        collection: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<IdPage, StorageError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let prefix = DocumentKey::prefix(collection)?;
        let start = match cursor {
            Some(after) => DocumentKey::new(collection, after)?.to_bytes(),
            None => prefix.clone(),
        };

        let mut page = IdPage::default();
        let mut last_key = None;
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            // cursor is exclusive
            if cursor.is_some() && key.as_ref() == start.as_slice() {
                continue;
            }
            if page.ids.len() == limit {
                page.next = last_key.take();
                break;
            }
            let doc: Document = serde_json::from_slice(&value)?;
            page.ids.push(document_id(&doc)?.clone());
            last_key = Some(DocumentKey::from_bytes(&key)?.id);
        }
        Ok(page)
    }

    async fn count(&self, collection: &str) -> Result<u64, StorageError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let prefix = DocumentKey::prefix(collection)?;
        let mut count = 0u64;
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait]
impl BuildStore for Storage {
    async fn find_one(&self, id: &str) -> Result<Option<BuildDocument>, StorageError> {
        self.get_build(id)
    }

    async fn push_job(&self, id: &str, job: JobRecord) -> Result<(), StorageError> {
        let mut doc = self
            .get_build(id)?
            .ok_or_else(|| StorageError::NotFound(format!("build document '{}'", id)))?;
        doc.jobs.push(job);
        self.put_build(&doc)
    }

    async fn replace(&self, doc: &BuildDocument) -> Result<(), StorageError> {
        self.put_build(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_types::JobStatus;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        (storage, temp_dir)
    }

    fn doc(id: &str) -> Document {
        json!({"_id": id, "symbol": id.to_uppercase()})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_open_creates_column_families() {
        let (storage, _temp) = create_test_storage();
        for cf_name in ALL_CF_NAMES {
            assert!(
                storage.db.cf_handle(cf_name).is_some(),
                "CF {} should exist",
                cf_name
            );
        }
    }

    #[tokio::test]
    async fn test_fetch_skips_missing() {
        let (storage, _temp) = create_test_storage();
        storage
            .put_documents("genes", &[doc("g1"), doc("g2")])
            .unwrap();

        let docs = storage
            .fetch("genes", &["g2".into(), "nope".into(), "g1".into()])
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["_id"], json!("g2"));
        assert_eq!(docs[1]["symbol"], json!("G1"));
    }

    #[tokio::test]
    async fn test_page_ids_walks_collection_in_order() {
        let (storage, _temp) = create_test_storage();
        let docs: Vec<Document> = (0..7).map(|i| doc(&format!("g{}", i))).collect();
        storage.put_documents("genes", &docs).unwrap();
        storage.put_documents("genes_hot", &[doc("h1")]).unwrap();

        let first = storage.page_ids("genes", None, 3).await.unwrap();
        assert_eq!(first.ids, vec![json!("g0"), json!("g1"), json!("g2")]);
        assert_eq!(first.next.as_deref(), Some("g2"));

        let second = storage
            .page_ids("genes", first.next.as_deref(), 3)
            .await
            .unwrap();
        assert_eq!(second.ids, vec![json!("g3"), json!("g4"), json!("g5")]);

        let last = storage
            .page_ids("genes", second.next.as_deref(), 3)
            .await
            .unwrap();
        assert_eq!(last.ids, vec![json!("g6")]);
        assert!(last.next.is_none());

        assert_eq!(storage.count("genes").await.unwrap(), 7);
        assert_eq!(storage.count("genes_hot").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_page_exact_multiple_ends_with_empty_page() {
        let (storage, _temp) = create_test_storage();
        storage
            .put_documents("genes", &[doc("a"), doc("b")])
            .unwrap();
        let first = storage.page_ids("genes", None, 2).await.unwrap();
        assert_eq!(first.ids.len(), 2);
        assert!(first.next.is_none());
    }

    #[tokio::test]
    async fn test_non_string_id_is_returned_raw() {
        let (storage, _temp) = create_test_storage();
        let numeric = json!({"_id": 7, "v": 1}).as_object().cloned().unwrap();
        storage.put_documents("mixed", &[numeric]).unwrap();
        let page = storage.page_ids("mixed", None, 10).await.unwrap();
        assert_eq!(page.ids, vec![json!(7)]);
    }

    #[test]
    fn test_document_without_id_rejected() {
        let (storage, _temp) = create_test_storage();
        let bad = json!({"v": 1}).as_object().cloned().unwrap();
        assert!(storage.put_documents("genes", &[bad]).is_err());
    }

    #[tokio::test]
    async fn test_build_store_roundtrip() {
        let (storage, _temp) = create_test_storage();
        let build = BuildDocument::new("genes_build1");
        storage.replace(&build).await.unwrap();

        storage
            .push_job("genes_build1", JobRecord::transient("index"))
            .await
            .unwrap();
        let loaded = storage.find_one("genes_build1").await.unwrap().unwrap();
        assert_eq!(loaded.jobs.len(), 1);
        assert_eq!(loaded.jobs[0].status, JobStatus::Indexing);

        assert!(storage.find_one("missing").await.unwrap().is_none());
        assert!(matches!(
            storage
                .push_job("missing", JobRecord::transient("index"))
                .await,
            Err(StorageError::NotFound(_))
        ));
    }
}
