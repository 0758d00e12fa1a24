//! Command implementations for the index hub.
//!
//! Each command loads settings, opens the stores and clients it needs and
//! drives one [`IndexerManager`] operation to completion.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use hub_indexing::{
    IndexReport, IndexRequest, IndexerManager, IndexingContext, MetaSource, PublishReport,
    PublishRequest,
};
use hub_scheduler::{JobManager, JobManagerConfig};
use hub_search::{EngineConnector, EsConnector, SnapshotState};
use hub_storage::{BuildStore, LocalObjectStore, Storage};
use hub_types::config::expand_home;
use hub_types::{BuildDocument, Document, IndexMode, Settings};

use crate::cli::{Cli, Commands};

const IMPORT_CHUNK: usize = 1_000;

/// Load configuration and apply CLI overrides (highest precedence).
pub fn load_settings(
    config_path: Option<&str>,
    db_path_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(db_path) = db_path_override {
        settings.db_path = db_path.to_string();
    }
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Stores, clients and the indexer manager of one process.
pub struct HubRuntime {
    pub settings: Settings,
    pub storage: Arc<Storage>,
    pub manager: IndexerManager,
}

impl HubRuntime {
    /// Open the runtime against Elasticsearch.
    pub fn open(settings: Settings) -> Result<Self> {
        Self::with_engine(settings, Arc::new(EsConnector::new()))
    }

    pub fn with_engine(settings: Settings, engine: Arc<dyn EngineConnector>) -> Result<Self> {
        let db_path = settings.expanded_db_path();
        info!(path = ?db_path, "Opening storage");
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        let storage = Arc::new(Storage::open(&db_path).context("Failed to open storage")?);

        let jobs = JobManager::new(JobManagerConfig::default().with_max_workers(settings.max_workers))
            .context("Failed to create job manager")?;
        let log_folder = settings.expanded_log_folder();
        let ctx = IndexingContext::new(
            storage.clone(),
            storage.clone(),
            engine,
            jobs,
            log_folder,
        );

        let mut objects = LocalObjectStore::new(expand_home(&settings.object_store.root));
        if let Some(base_url) = &settings.object_store.base_url {
            objects = objects.with_base_url(base_url.clone());
        }
        let manager = IndexerManager::new(settings.clone(), ctx, Arc::new(objects))
            .context("Invalid indexer configuration")?;

        Ok(Self {
            settings,
            storage,
            manager,
        })
    }
}

/// Options of the `import` command.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub doc_type: String,
    pub build_version: Option<String>,
    pub mapping: Option<Document>,
    pub cold: Option<String>,
}

/// Load a JSON-lines file into `collection` and create or update its build
/// document. Returns the number of documents stored.
pub async fn import_collection(
    storage: &Storage,
    collection: &str,
    file: &Path,
    options: ImportOptions,
) -> Result<usize> {
    let reader = BufReader::new(
        fs::File::open(file).with_context(|| format!("Failed to open {}", file.display()))?,
    );
    let mut chunk = Vec::with_capacity(IMPORT_CHUNK);
    let mut total = 0;
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: Document = serde_json::from_str(&line)
            .with_context(|| format!("Invalid JSON on line {}", n + 1))?;
        if !doc.contains_key("_id") {
            bail!("Document on line {} has no _id", n + 1);
        }
        chunk.push(doc);
        if chunk.len() == IMPORT_CHUNK {
            total += storage.put_documents(collection, &chunk)?;
            chunk.clear();
        }
    }
    if !chunk.is_empty() {
        total += storage.put_documents(collection, &chunk)?;
    }

    let mut build = storage
        .find_one(collection)
        .await?
        .unwrap_or_else(|| BuildDocument::new(collection));
    let mut config = build.build_config.take().unwrap_or_default();
    config.doc_type = Some(options.doc_type);
    config.name.get_or_insert_with(|| collection.to_string());
    if options.cold.is_some() {
        config.cold_collection = options.cold;
    }
    build.build_config = Some(config);
    if let Some(mapping) = options.mapping {
        build.mapping = mapping;
    }
    if options.build_version.is_some() {
        build.meta.build_version = options.build_version;
    }
    build.meta.build_date = Some(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string());
    storage.replace(&build).await?;
    storage.flush()?;
    info!(collection = %collection, count = total, "Collection imported");
    Ok(total)
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run_index(rt: &HubRuntime, env: &str, request: IndexRequest) -> Result<IndexReport> {
    let handle = rt.manager.index(env, request).await?;
    let report = handle.await.context("Index job terminated")??;
    Ok(report)
}

pub async fn run_snapshot(
    rt: &HubRuntime,
    env: &str,
    index: &str,
    snapshot: Option<&str>,
    mode: IndexMode,
    repository: Option<&str>,
) -> Result<SnapshotState> {
    let handle = rt
        .manager
        .snapshot(env, index, snapshot, mode, repository)
        .await?;
    Ok(handle.await.context("Snapshot job terminated")??)
}

pub async fn run_publish(rt: &HubRuntime, request: PublishRequest) -> Result<PublishReport> {
    let handle = rt.manager.publish_snapshot(request).await?;
    Ok(handle.await.context("Publish job terminated")??)
}

/// Build document of `collection`.
pub async fn build_status(rt: &HubRuntime, collection: &str) -> Result<BuildDocument> {
    rt.storage
        .find_one(collection)
        .await?
        .with_context(|| format!("No build named '{}'", collection))
}

/// Run one parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(
        cli.config.as_deref(),
        cli.db_path.as_deref(),
        cli.log_level.as_deref(),
    )?;
    init_logging(&settings.log_level)?;

    if let Commands::Envs { env } = &cli.command {
        let mut envs = settings.env.clone();
        if let Some(name) = env {
            envs.retain(|k, _| k == name);
            if envs.is_empty() {
                bail!("Unknown environment '{}'", name);
            }
        }
        return print_json(&envs);
    }

    let rt = HubRuntime::open(settings)?;
    match cli.command {
        Commands::Import {
            collection,
            file,
            doc_type,
            build_version,
            mapping,
            cold,
        } => {
            let mapping = match mapping {
                Some(path) => match read_json(&path)? {
                    Value::Object(map) => Some(map),
                    _ => bail!("Mapping in {} is not a JSON object", path.display()),
                },
                None => None,
            };
            let options = ImportOptions {
                doc_type,
                build_version,
                mapping,
                cold,
            };
            let count = import_collection(&rt.storage, &collection, &file, options).await?;
            println!("Imported {} documents into '{}'", count, collection);
        }
        Commands::Index {
            collection,
            env,
            index_name,
            mode,
            steps,
            batch_size,
            ids,
        } => {
            let mut request = IndexRequest::new(collection)
                .with_mode(mode)
                .with_steps(steps)
                .with_batch_size(batch_size.unwrap_or(rt.settings.default_batch_size));
            if let Some(index_name) = index_name {
                request = request.with_index_name(index_name);
            }
            if let Some(ids) = ids {
                request = request.with_ids(ids.into_iter().map(Value::String).collect());
            }
            let report = run_index(&rt, &env, request).await?;
            print_json(&report.counts())?;
        }
        Commands::Snapshot {
            index,
            env,
            snapshot,
            mode,
            repository,
        } => {
            let state = run_snapshot(
                &rt,
                &env,
                &index,
                snapshot.as_deref(),
                mode,
                repository.as_deref(),
            )
            .await?;
            println!("Snapshot of '{}': {}", index, state);
        }
        Commands::Publish {
            folder,
            env,
            prev,
            snapshot,
            release_folder,
            index,
            repository,
            steps,
        } => {
            let request = PublishRequest {
                env,
                folder,
                prev,
                snapshot,
                release_folder,
                index,
                repository,
                steps,
            };
            let report = run_publish(&rt, request).await?;
            print_json(&report)?;
        }
        Commands::ValidateMapping { mapping, env } => {
            let mapping = read_json(&mapping)?;
            rt.manager.validate_mapping(&mapping, &env).await?;
            println!("Mapping is valid");
        }
        Commands::UpdateMeta {
            index,
            env,
            build,
            meta_file,
        } => {
            let source = match (build, meta_file) {
                (Some(build), _) => MetaSource::Build(build),
                (None, Some(path)) => MetaSource::Explicit(read_json(&path)?),
                (None, None) => bail!("Either --build or --meta-file is required"),
            };
            let meta = rt.manager.update_metadata(&env, &index, source).await?;
            print_json(&meta)?;
        }
        Commands::Status { collection } => {
            let build = build_status(&rt, &collection).await?;
            print_json(&serde_json::json!({
                "_id": build.id,
                "jobs": build.jobs,
                "index": build.index,
            }))?;
        }
        Commands::Envs { .. } => {}
    }
    Ok(())
}
