//! Batch workers.
//!
//! A worker writes one [`BatchTask`] into the engine. It connects its own
//! client from the task's parameters and shares nothing mutable with the
//! orchestrator. Three strategies:
//!
//! - fresh: fetch the source documents and overwrite them in the index
//! - merge: overlay source fields on already indexed documents
//! - resume: only send ids the index does not hold yet
//!
//! A failing batch dumps its error and id list to
//! `{log_folder}/{task.log_name()}.json` before the error is returned.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use hub_search::{BulkOutcome, EngineConnector, IndexClient};
use hub_storage::DocumentStore;
use hub_types::{BatchTask, Document, IndexMode, WorkerKind};

use crate::error::IndexerError;

/// Internal bookkeeping field never sent to the engine in merge mode.
const TIMESTAMP_FIELD: &str = "_timestamp";

#[derive(Clone)]
pub struct BatchWorker {
    documents: Arc<dyn DocumentStore>,
    engine: Arc<dyn EngineConnector>,
    log_folder: PathBuf,
}

impl BatchWorker {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        engine: Arc<dyn EngineConnector>,
        log_folder: impl Into<PathBuf>,
    ) -> Self {
        Self {
            documents,
            engine,
            log_folder: log_folder.into(),
        }
    }

    /// Index one batch, dumping the ids to a side file if it fails.
    pub async fn run(&self, task: &BatchTask) -> Result<BulkOutcome, IndexerError> {
        match self.dispatch(task).await {
            Ok(outcome) => {
                if !outcome.errors.is_empty() {
                    warn!(
                        index = %task.params.index_name,
                        collection = %task.collection,
                        batch = task.batch_num,
                        errors = outcome.errors.len(),
                        "Engine rejected documents"
                    );
                }
                debug!(
                    index = %task.params.index_name,
                    batch = task.batch_num,
                    count = outcome.count,
                    "Batch indexed"
                );
                Ok(outcome)
            }
            Err(e) => {
                error!(
                    index = %task.params.index_name,
                    collection = %task.collection,
                    batch = task.batch_num,
                    ids = task.ids.len(),
                    error = %e,
                    "Batch failed"
                );
                if let Err(dump_err) = self.dump_failure(task, &e).await {
                    warn!(batch = task.batch_num, error = %dump_err, "Could not write failure dump");
                }
                Err(e)
            }
        }
    }

    async fn dispatch(&self, task: &BatchTask) -> Result<BulkOutcome, IndexerError> {
        let client = self.engine.client(&task.params)?;
        match task.mode {
            IndexMode::Resume => self.index_resume(client.as_ref(), task).await,
            _ => self.index_with(client.as_ref(), task, &task.ids).await,
        }
    }

    async fn index_with(
        &self,
        client: &dyn IndexClient,
        task: &BatchTask,
        ids: &[String],
    ) -> Result<BulkOutcome, IndexerError> {
        match task.worker {
            WorkerKind::Fresh => self.index_fresh(client, &task.collection, ids).await,
            WorkerKind::Merge => self.index_merge(client, &task.collection, ids).await,
        }
    }

    /// Fetch source documents and overwrite them in the index.
    pub async fn index_fresh(
        &self,
        client: &dyn IndexClient,
        collection: &str,
        ids: &[String],
    ) -> Result<BulkOutcome, IndexerError> {
        let docs = self.documents.fetch(collection, ids).await?;
        if docs.is_empty() {
            return Ok(BulkOutcome::default());
        }
        Ok(client.bulk_index(docs).await?)
    }

    /// Overlay source documents on their indexed counterparts.
    ///
    /// Source fields overwrite, index-only fields are kept. Ids absent from
    /// the index are inserted as they are.
    pub async fn index_merge(
        &self,
        client: &dyn IndexClient,
        collection: &str,
        ids: &[String],
    ) -> Result<BulkOutcome, IndexerError> {
        let mut source = self.documents.fetch(collection, ids).await?;
        for doc in &mut source {
            doc.remove(TIMESTAMP_FIELD);
        }
        let source_ids: Vec<String> = source.iter().filter_map(doc_id).collect();
        let existing = client.mget(&source_ids).await?;

        let mut by_id: HashMap<String, Document> = source
            .into_iter()
            .filter_map(|d| doc_id(&d).map(|id| (id, d)))
            .collect();

        let mut updated = Vec::with_capacity(existing.len());
        for mut indexed in existing {
            let Some(id) = doc_id(&indexed) else { continue };
            if let Some(src) = by_id.remove(&id) {
                indexed.extend(src);
                updated.push(indexed);
            }
        }
        // keep source order for inserts
        let mut fresh: Vec<Document> = Vec::with_capacity(by_id.len());
        for id in &source_ids {
            if let Some(doc) = by_id.remove(id) {
                fresh.push(doc);
            }
        }

        let mut outcome = BulkOutcome::default();
        if !updated.is_empty() {
            outcome = outcome.combine(client.bulk_index(updated).await?);
        }
        if !fresh.is_empty() {
            outcome = outcome.combine(client.bulk_index(fresh).await?);
        }
        Ok(outcome)
    }

    /// Send only the ids the index does not hold yet.
    pub async fn index_resume(
        &self,
        client: &dyn IndexClient,
        task: &BatchTask,
    ) -> Result<BulkOutcome, IndexerError> {
        let present: HashSet<String> = client
            .exists_bulk(&task.ids)
            .await?
            .into_iter()
            .filter_map(|(id, found)| found.then_some(id))
            .collect();
        let missing: Vec<String> = task
            .ids
            .iter()
            .filter(|id| !present.contains(*id))
            .cloned()
            .collect();
        if missing.is_empty() {
            info!(
                index = %task.params.index_name,
                batch = task.batch_num,
                "Batch already indexed, skipping"
            );
            return Ok(BulkOutcome::default());
        }
        debug!(
            batch = task.batch_num,
            missing = missing.len(),
            total = task.ids.len(),
            "Resuming batch"
        );
        self.index_with(client, task, &missing).await
    }

    async fn dump_failure(&self, task: &BatchTask, err: &IndexerError) -> Result<PathBuf, IndexerError> {
        tokio::fs::create_dir_all(&self.log_folder).await?;
        let path = self.log_folder.join(format!("{}.json", task.log_name()));
        let dump = json!({
            "error": err.to_string(),
            "collection": task.collection,
            "index": task.params.index_name,
            "batch_num": task.batch_num,
            "ids": task.ids,
        });
        tokio::fs::write(&path, serde_json::to_vec_pretty(&dump)?).await?;
        Ok(path)
    }
}

fn doc_id(doc: &Document) -> Option<String> {
    match doc.get("_id")? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
