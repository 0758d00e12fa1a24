//! In-process document and build store.
//!
//! Same paging and replace semantics as the RocksDB store, kept in
//! `BTreeMap`s so ids sort the same way. Used by tests and dry runs.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use hub_types::{BuildDocument, Document, JobRecord};

use crate::error::StorageError;
use crate::keys::{id_text, DocumentKey};
use crate::traits::{document_id, BuildStore, DocumentStore, IdPage};

type Collection = BTreeMap<String, Document>;

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, Collection>>,
    builds: RwLock<BTreeMap<String, BuildDocument>>,
}

fn poisoned<T>(_: T) -> StorageError {
    StorageError::Key("memory store lock poisoned".to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write documents into a collection, overwriting same `_id`s.
    pub fn put_documents(&self, collection: &str, docs: Vec<Document>) -> Result<usize, StorageError> {
        DocumentKey::prefix(collection)?;
        let mut keyed = Vec::with_capacity(docs.len());
        for doc in docs {
            let key = id_text(document_id(&doc)?);
            keyed.push((key, doc));
        }
        let count = keyed.len();
        let mut collections = self.collections.write().map_err(poisoned)?;
        collections
            .entry(collection.to_string())
            .or_default()
            .extend(keyed);
        Ok(count)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn fetch(&self, collection: &str, ids: &[String]) -> Result<Vec<Document>, StorageError> {
        let collections = self.collections.read().map_err(poisoned)?;
        let Some(coll) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| coll.get(id).cloned()).collect())
    }

    async fn page_ids(
        &self,
        collection: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<IdPage, StorageError> {
        use std::ops::Bound;

        let collections = self.collections.read().map_err(poisoned)?;
        let Some(coll) = collections.get(collection) else {
            return Ok(IdPage::default());
        };
        let lower = match cursor {
            Some(after) => Bound::Excluded(after.to_string()),
            None => Bound::Unbounded,
        };
        let mut iter = coll.range((lower, Bound::Unbounded));
        let mut page = IdPage::default();
        let mut last_key = None;
        for (key, doc) in iter.by_ref().take(limit) {
            page.ids.push(document_id(doc)?.clone());
            last_key = Some(key.clone());
        }
        if iter.next().is_some() {
            page.next = last_key;
        }
        Ok(page)
    }

    async fn count(&self, collection: &str) -> Result<u64, StorageError> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(collections.get(collection).map_or(0, |c| c.len() as u64))
    }
}

#[async_trait]
impl BuildStore for MemoryStore {
    async fn find_one(&self, id: &str) -> Result<Option<BuildDocument>, StorageError> {
        let builds = self.builds.read().map_err(poisoned)?;
        Ok(builds.get(id).cloned())
    }

    async fn push_job(&self, id: &str, job: JobRecord) -> Result<(), StorageError> {
        let mut builds = self.builds.write().map_err(poisoned)?;
        let doc = builds
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("build document '{}'", id)))?;
        doc.jobs.push(job);
        Ok(())
    }

    async fn replace(&self, doc: &BuildDocument) -> Result<(), StorageError> {
        let mut builds = self.builds.write().map_err(poisoned)?;
        builds.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

}
