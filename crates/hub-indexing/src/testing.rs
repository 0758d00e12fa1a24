//! Shared test fixture: in-memory stores, engine and job manager.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use hub_scheduler::{JobManager, JobManagerConfig};
use hub_search::MemoryEngine;
use hub_storage::{BuildStore, MemoryStore};
use hub_types::{BuildConfig, BuildDocument, BuildMeta, Document, EnvConfig};

use crate::context::IndexingContext;
use crate::indexer::{Indexer, IndexerEnv};

pub(crate) struct Fixture {
    pub store: Arc<MemoryStore>,
    pub engine: MemoryEngine,
    pub ctx: IndexingContext,
    temp: TempDir,
}

pub(crate) fn doc(value: serde_json::Value) -> Document {
    value.as_object().cloned().unwrap()
}

pub(crate) fn gene_ids(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{}{:05}", prefix, i)).collect()
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_engine(MemoryEngine::new()).await
    }

    pub async fn with_engine(engine: MemoryEngine) -> Self {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let jobs = JobManager::new(JobManagerConfig {
            max_workers: 2,
            predicate_poll_ms: 10,
        })
        .unwrap();
        let ctx = IndexingContext::new(
            store.clone(),
            store.clone(),
            Arc::new(engine.clone()),
            jobs,
            temp.path().join("logs"),
        );
        Self {
            store,
            engine,
            ctx,
            temp,
        }
    }

    pub fn env() -> IndexerEnv {
        IndexerEnv::new("local", EnvConfig::new("memory"))
    }

    pub fn indexer(&self) -> Indexer {
        Indexer::new(self.ctx.clone(), Self::env())
    }

    pub fn log_dir(&self) -> PathBuf {
        self.temp.path().join("logs")
    }

    pub fn root(&self) -> PathBuf {
        self.temp.path().to_path_buf()
    }

    /// Register a build with `n` documents `g00000..`.
    pub async fn add_build(&self, name: &str, n: usize) {
        self.add_build_with(name, "g", n, BuildConfig::default(), json!({"symbol": {"type": "keyword"}}))
            .await;
    }

    pub async fn add_build_with(
        &self,
        name: &str,
        id_prefix: &str,
        n: usize,
        mut config: BuildConfig,
        mapping: serde_json::Value,
    ) {
        config.doc_type.get_or_insert_with(|| "gene".to_string());
        let meta = BuildMeta {
            build_version: Some(format!("{}_v1", name)),
            build_date: Some("2024-03-01T10:00:00".to_string()),
            ..BuildMeta::default()
        };
        let build = BuildDocument::new(name)
            .with_config(config)
            .with_mapping(doc(mapping))
            .with_meta(meta);
        self.store.replace(&build).await.unwrap();

        let docs = gene_ids(id_prefix, n)
            .into_iter()
            .map(|id| doc(json!({"_id": id, "symbol": format!("SYM-{}", id), "_timestamp": "2024-03-01"})))
            .collect();
        self.store.put_documents(name, docs).unwrap();
    }

    pub async fn build(&self, name: &str) -> BuildDocument {
        self.store.find_one(name).await.unwrap().unwrap()
    }
}
