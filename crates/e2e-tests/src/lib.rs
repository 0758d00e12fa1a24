//! End-to-end test infrastructure for the index hub.
//!
//! Provides a shared TestHarness wiring RocksDB storage, the in-memory
//! engine, a job manager and an [`IndexerManager`] the way the daemon does.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use hub_indexing::{IndexerManager, IndexingContext};
use hub_scheduler::{JobManager, JobManagerConfig};
use hub_search::MemoryEngine;
use hub_storage::{BuildStore, LocalObjectStore, Storage};
use hub_types::{
    BuildConfig, BuildDocument, BuildMeta, Document, EnvConfig, IndexerSelect, Settings,
    VersionStamps,
};

/// Environment every harness configures.
pub const ENV: &str = "local";

/// Snapshot repository registered in the harness engine.
pub const REPOSITORY: &str = "hub_repo";

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub root: PathBuf,
    pub storage: Arc<Storage>,
    pub engine: MemoryEngine,
    pub jobs: JobManager,
    pub manager: IndexerManager,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_engine(MemoryEngine::new())
    }

    /// Harness over `engine`, with the snapshot repository registered.
    pub fn with_engine(engine: MemoryEngine) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        let settings = harness_settings(&root);
        Self::build(temp_dir, settings, engine)
    }

    /// Harness with custom settings; paths are still rooted in the temp dir.
    pub fn with_settings(engine: MemoryEngine, adjust: impl FnOnce(&mut Settings)) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let mut settings = harness_settings(temp_dir.path());
        adjust(&mut settings);
        Self::build(temp_dir, settings, engine)
    }

    fn build(temp_dir: tempfile::TempDir, settings: Settings, engine: MemoryEngine) -> Self {
        let root = temp_dir.path().to_path_buf();
        let engine = engine.with_repository(REPOSITORY, json!({"type": "fs", "settings": {"location": "/snapshots"}}));
        let storage = Arc::new(Storage::open(&root.join("db")).expect("Failed to open test storage"));
        let jobs = JobManager::new(JobManagerConfig {
            max_workers: settings.max_workers,
            predicate_poll_ms: 10,
        })
        .expect("Failed to create job manager");
        let ctx = IndexingContext::new(
            storage.clone(),
            storage.clone(),
            Arc::new(engine.clone()),
            jobs.clone(),
            root.join("logs"),
        );
        let objects = Arc::new(
            LocalObjectStore::new(root.join("bucket")).with_base_url("https://releases.example.org"),
        );
        let manager = IndexerManager::new(settings, ctx, objects)
            .expect("Failed to create indexer manager")
            .with_snapshot_delay(Duration::from_millis(5));

        Self {
            _temp_dir: temp_dir,
            root,
            storage,
            engine,
            jobs,
            manager,
        }
    }

    pub fn log_folder(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn bucket(&self) -> PathBuf {
        self.root.join("bucket")
    }

    pub fn release_path(&self) -> PathBuf {
        self.root.join("release")
    }

    /// Store `count` documents `{prefix}00000..` in `collection` and register
    /// its build document.
    pub async fn add_build(&self, collection: &str, prefix: &str, count: usize) -> BuildDocument {
        self.add_build_with(collection, prefix, count, BuildConfig::default(), default_mapping())
            .await
    }

    pub async fn add_build_with(
        &self,
        collection: &str,
        prefix: &str,
        count: usize,
        mut config: BuildConfig,
        mapping: Value,
    ) -> BuildDocument {
        let docs: Vec<Document> = generate_ids(prefix, count)
            .into_iter()
            .map(|id| gene_doc(&id, collection))
            .collect();
        for chunk in docs.chunks(5_000) {
            self.storage
                .put_documents(collection, chunk)
                .expect("Failed to store documents");
        }

        config.doc_type.get_or_insert_with(|| "gene".to_string());
        let build = BuildDocument::new(collection)
            .with_config(config)
            .with_mapping(mapping.as_object().cloned().unwrap_or_default())
            .with_meta(BuildMeta {
                build_version: Some(format!("{}_v1", collection)),
                build_date: Some("2024-03-01T10:00:00".to_string()),
                ..BuildMeta::default()
            });
        self.storage
            .replace(&build)
            .await
            .expect("Failed to store build document");
        build
    }

    pub async fn build(&self, collection: &str) -> BuildDocument {
        self.storage
            .find_one(collection)
            .await
            .expect("Failed to read build document")
            .expect("Build document missing")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn harness_settings(root: &Path) -> Settings {
    let path = |name: &str| root.join(name).to_string_lossy().to_string();
    Settings {
        db_path: path("db"),
        log_folder: path("logs"),
        diff_path: path("diff"),
        release_path: path("release"),
        snapshot_repository: REPOSITORY.to_string(),
        max_workers: 3,
        versions: VersionStamps {
            app: "2.1".to_string(),
            hub: "0.12".to_string(),
            standalone: Some("0.5".to_string()),
        },
        env: BTreeMap::from([(ENV.to_string(), EnvConfig::new("http://memory:9200"))]),
        indexer_select: vec![IndexerSelect {
            path: Some("build_config.cold_collection".to_string()),
            kind: "cold_hot".to_string(),
        }],
        ..Settings::default()
    }
}

pub fn default_mapping() -> Value {
    json!({
        "symbol": {"type": "keyword", "normalizer": "keyword_lowercase_normalizer"},
        "name": {"type": "text"}
    })
}

/// Zero-padded ids, lexicographic order equals numeric order.
pub fn generate_ids(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{}{:05}", prefix, i)).collect()
}

pub fn gene_doc(id: &str, collection: &str) -> Document {
    let value = json!({
        "_id": id,
        "symbol": format!("SYM{}", id),
        "name": format!("gene {} from {}", id, collection),
        "_timestamp": "2024-03-01T10:00:00",
    });
    value.as_object().cloned().unwrap_or_default()
}
