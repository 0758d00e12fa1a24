//! In-process search engine.
//!
//! Holds indices as maps of documents and records every write so tests can
//! assert on side effects. Snapshot states can be scripted per snapshot name
//! to drive polling loops.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value};

use hub_types::{ClientParams, Document};

use crate::client::{BulkOutcome, EngineConnector, IndexClient, SnapshotState};
use crate::error::SearchError;

/// One index held by the engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    pub mapping: Value,
    pub settings: Value,
    pub docs: BTreeMap<String, Document>,
}

#[derive(Default)]
struct EngineState {
    indices: BTreeMap<String, MemoryIndex>,
    repositories: BTreeMap<String, Value>,
    snapshots: BTreeMap<(String, String), String>,
    snapshot_script: HashMap<(String, String), VecDeque<SnapshotState>>,
    failing_ids: HashSet<String>,
    reject_mapping_fields: HashSet<String>,
    write_calls: usize,
    created: Vec<String>,
    deleted: Vec<String>,
}

/// Shared in-memory engine. Cloning shares state.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    state: Arc<Mutex<EngineState>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make any bulk write containing one of these ids fail.
    pub fn with_failing_ids<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .failing_ids
            .extend(ids.into_iter().map(Into::into));
        self
    }

    /// Reject index creation when the mapping declares this property.
    pub fn with_rejected_field(self, field: impl Into<String>) -> Self {
        self.lock().reject_mapping_fields.insert(field.into());
        self
    }

    pub fn with_repository(self, name: impl Into<String>, settings: Value) -> Self {
        self.lock().repositories.insert(name.into(), settings);
        self
    }

    /// Queue the states successive status calls report for a snapshot.
    /// Once the queue is drained the last state keeps being reported.
    pub fn script_snapshot(
        &self,
        repository: &str,
        snapshot: &str,
        states: impl IntoIterator<Item = SnapshotState>,
    ) {
        self.lock()
            .snapshot_script
            .insert((repository.to_string(), snapshot.to_string()), states.into_iter().collect());
    }

    /// Create an index directly, bypassing the client.
    pub fn seed_index(&self, index: &str, docs: Vec<Document>) {
        let mut state = self.lock();
        let entry = state.indices.entry(index.to_string()).or_default();
        for doc in docs {
            if let Some(id) = doc.get("_id").map(id_text) {
                entry.docs.insert(id, doc);
            }
        }
    }

    pub fn index(&self, index: &str) -> Option<MemoryIndex> {
        self.lock().indices.get(index).cloned()
    }

    pub fn doc(&self, index: &str, id: &str) -> Option<Document> {
        self.lock()
            .indices
            .get(index)
            .and_then(|i| i.docs.get(id).cloned())
    }

    pub fn doc_count(&self, index: &str) -> usize {
        self.lock().indices.get(index).map_or(0, |i| i.docs.len())
    }

    pub fn index_names(&self) -> Vec<String> {
        self.lock().indices.keys().cloned().collect()
    }

    /// Number of bulk write calls that reached the engine.
    pub fn write_calls(&self) -> usize {
        self.lock().write_calls
    }

    pub fn created_indices(&self) -> Vec<String> {
        self.lock().created.clone()
    }

    pub fn deleted_indices(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    pub fn snapshot_index(&self, repository: &str, snapshot: &str) -> Option<String> {
        self.lock()
            .snapshots
            .get(&(repository.to_string(), snapshot.to_string()))
            .cloned()
    }
}

impl EngineConnector for MemoryEngine {
    fn client(&self, params: &ClientParams) -> Result<Arc<dyn IndexClient>, SearchError> {
        Ok(Arc::new(MemoryIndexClient {
            engine: self.clone(),
            index: params.index_name.clone(),
            num_shards: params.num_shards,
            num_replicas: params.num_replicas,
        }))
    }
}

/// Client bound to one index of a [`MemoryEngine`].
pub struct MemoryIndexClient {
    engine: MemoryEngine,
    index: String,
    num_shards: u32,
    num_replicas: u32,
}

fn id_text(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl MemoryIndexClient {
    fn missing(&self) -> SearchError {
        SearchError::IndexNotFound(self.index.clone())
    }
}

#[async_trait]
impl IndexClient for MemoryIndexClient {
    fn index_name(&self) -> &str {
        &self.index
    }

    async fn create_index(&self, mapping: &Value, settings: &Value) -> Result<(), SearchError> {
        let mut state = self.engine.lock();
        if state.indices.contains_key(&self.index) {
            return Err(SearchError::Status {
                status: 400,
                body: format!("resource_already_exists_exception: {}", self.index),
            });
        }
        if let Some(props) = mapping.get("properties").and_then(Value::as_object) {
            if let Some(bad) = props.keys().find(|k| state.reject_mapping_fields.contains(*k)) {
                return Err(SearchError::Status {
                    status: 400,
                    body: format!("mapper_parsing_exception: field '{}'", bad),
                });
            }
        }
        let mut merged = json!({
            "number_of_shards": self.num_shards,
            "number_of_replicas": self.num_replicas,
        });
        if let (Some(base), Some(extra)) = (merged.as_object_mut(), settings.as_object()) {
            base.extend(extra.clone());
        }
        state.indices.insert(
            self.index.clone(),
            MemoryIndex {
                mapping: mapping.clone(),
                settings: merged,
                docs: BTreeMap::new(),
            },
        );
        state.created.push(self.index.clone());
        Ok(())
    }

    async fn index_exists(&self) -> Result<bool, SearchError> {
        Ok(self.engine.lock().indices.contains_key(&self.index))
    }

    async fn delete_index(&self) -> Result<(), SearchError> {
        let mut state = self.engine.lock();
        if state.indices.remove(&self.index).is_none() {
            return Err(self.missing());
        }
        state.deleted.push(self.index.clone());
        Ok(())
    }

    async fn bulk_index(&self, docs: Vec<Document>) -> Result<BulkOutcome, SearchError> {
        let mut state = self.engine.lock();
        state.write_calls += 1;
        if let Some(bad) = docs
            .iter()
            .filter_map(|d| d.get("_id").map(id_text))
            .find(|id| state.failing_ids.contains(id))
        {
            return Err(SearchError::Http(format!("connection reset while indexing '{}'", bad)));
        }
        let index = state.indices.get_mut(&self.index).ok_or_else(|| self.missing())?;
        let mut outcome = BulkOutcome::default();
        for doc in docs {
            match doc.get("_id").map(id_text) {
                Some(id) => {
                    index.docs.insert(id, doc);
                    outcome.count += 1;
                }
                None => outcome
                    .errors
                    .push(json!({"error": "document has no _id", "doc": doc})),
            }
        }
        Ok(outcome)
    }

    async fn mget(&self, ids: &[String]) -> Result<Vec<Document>, SearchError> {
        let state = self.engine.lock();
        let index = state.indices.get(&self.index).ok_or_else(|| self.missing())?;
        Ok(ids.iter().filter_map(|id| index.docs.get(id).cloned()).collect())
    }

    async fn exists_bulk(&self, ids: &[String]) -> Result<Vec<(String, bool)>, SearchError> {
        let state = self.engine.lock();
        let index = state.indices.get(&self.index).ok_or_else(|| self.missing())?;
        Ok(ids
            .iter()
            .map(|id| (id.clone(), index.docs.contains_key(id)))
            .collect())
    }

    async fn count(&self) -> Result<u64, SearchError> {
        let state = self.engine.lock();
        let index = state.indices.get(&self.index).ok_or_else(|| self.missing())?;
        Ok(index.docs.len() as u64)
    }

    async fn snapshot_create(
        &self,
        repository: &str,
        snapshot: &str,
        purge: bool,
    ) -> Result<Value, SearchError> {
        let mut state = self.engine.lock();
        if !state.repositories.contains_key(repository) {
            return Err(SearchError::SnapshotNotFound(format!("repository '{}'", repository)));
        }
        let key = (repository.to_string(), snapshot.to_string());
        if state.snapshots.contains_key(&key) {
            if !purge {
                return Err(SearchError::Status {
                    status: 400,
                    body: format!("invalid_snapshot_name_exception: {}", snapshot),
                });
            }
            state.snapshots.remove(&key);
        }
        state.snapshots.insert(key, self.index.clone());
        Ok(json!({"accepted": true}))
    }

    async fn snapshot_status(
        &self,
        repository: &str,
        snapshot: &str,
    ) -> Result<SnapshotState, SearchError> {
        let mut state = self.engine.lock();
        let key = (repository.to_string(), snapshot.to_string());
        if !state.snapshots.contains_key(&key) {
            return Err(SearchError::SnapshotNotFound(format!("{}/{}", repository, snapshot)));
        }
        match state.snapshot_script.get_mut(&key) {
            Some(queue) if queue.len() > 1 => Ok(queue.pop_front().unwrap_or(SnapshotState::Success)),
            Some(queue) => Ok(queue.front().cloned().unwrap_or(SnapshotState::Success)),
            None => Ok(SnapshotState::Success),
        }
    }

    async fn get_mapping_meta(&self) -> Result<Value, SearchError> {
        let state = self.engine.lock();
        let index = state.indices.get(&self.index).ok_or_else(|| self.missing())?;
        Ok(index.mapping.get("_meta").cloned().unwrap_or(Value::Null))
    }

    async fn update_mapping_meta(&self, meta: &Value) -> Result<(), SearchError> {
        let mut state = self.engine.lock();
        let missing = self.missing();
        let index = state.indices.get_mut(&self.index).ok_or(missing)?;
        if !index.mapping.is_object() {
            index.mapping = json!({});
        }
        if let Some(mapping) = index.mapping.as_object_mut() {
            mapping.insert("_meta".to_string(), meta.clone());
        }
        Ok(())
    }

    async fn get_repository(&self, repository: &str) -> Result<Value, SearchError> {
        self.engine
            .lock()
            .repositories
            .get(repository)
            .cloned()
            .ok_or_else(|| SearchError::SnapshotNotFound(format!("repository '{}'", repository)))
    }
}
