//! Indexer orchestration.
//!
//! The [`IndexerManager`] owns the environment configuration, picks the
//! indexer kind for a build, and runs the snapshot and publish lifecycle.
//! Snapshot and publish jobs exclude each other system-wide through a
//! predicate on the running-job registry.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use hub_scheduler::{no_other, JobCategory, JobHandle, JobInfo};
use hub_search::{IndexClient, SnapshotState};
use hub_storage::ObjectStore;
use hub_types::{BuildMeta, ClientParams, EnvConfig, HubError, IndexMode, Settings};

use crate::context::IndexingContext;
use crate::error::IndexerError;
use crate::hooks::{DefaultHooks, IndexerHooks, PostPublishArgs, PublishHooks};
use crate::indexer::{IndexReport, IndexRequest, Indexer, IndexerEnv};
use crate::registry::IndexerRegistry;
use crate::release::{
    check_versions, register_version, release_folder_for, upload_release_metadata,
    upload_release_notes, ReleaseMetadata, SnapshotLocation,
};

/// Doc type used for indices that have no build document.
pub const FALLBACK_DOC_TYPE: &str = "_doc";

const TMP_INDEX_PREFIX: &str = "hub_tmp_";
const MASTER_ROLE: &str = "master";

/// Which publish steps to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishSteps {
    pub meta: bool,
    pub post: bool,
}

impl Default for PublishSteps {
    fn default() -> Self {
        Self {
            meta: true,
            post: true,
        }
    }
}

impl FromStr for PublishSteps {
    type Err = IndexerError;

    /// Comma-separated list of `meta`, `post`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut steps = PublishSteps {
            meta: false,
            post: false,
        };
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part {
                "meta" => steps.meta = true,
                "post" => steps.post = true,
                other => {
                    return Err(IndexerError::Configuration(format!(
                        "unknown publish step '{}'",
                        other
                    )))
                }
            }
        }
        if !steps.meta && !steps.post {
            return Err(IndexerError::Configuration("no publish step given".to_string()));
        }
        Ok(steps)
    }
}

/// Parameters of [`IndexerManager::publish_snapshot`].
#[derive(Debug, Clone, Default)]
pub struct PublishRequest {
    pub env: String,
    /// Object store folder receiving the release metadata
    pub folder: String,
    /// Previous release, used to derive the release folder
    pub prev: Option<String>,
    pub snapshot: Option<String>,
    /// Local folder holding release notes
    pub release_folder: Option<PathBuf>,
    /// Index the snapshot was taken from, defaults to the snapshot name
    pub index: Option<String>,
    pub repository: Option<String>,
    pub steps: PublishSteps,
}

impl PublishRequest {
    pub fn new(env: impl Into<String>, folder: impl Into<String>) -> Self {
        Self {
            env: env.into(),
            folder: folder.into(),
            ..Self::default()
        }
    }
}

/// Outcome of a publish job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PublishReport {
    pub snapshot: String,
    /// Version registered by the meta step
    pub version: Option<String>,
    /// URL of the uploaded release metadata
    pub url: Option<String>,
}

/// Source of the `_meta` written by [`IndexerManager::update_metadata`].
#[derive(Debug, Clone)]
pub enum MetaSource {
    /// Metadata of a build document
    Build(String),
    Explicit(Value),
}

/// Lowercase `hub_tmp_<random>` index name.
pub fn temporary_index_name() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("{}{}", TMP_INDEX_PREFIX, suffix).to_lowercase()
}

#[derive(Clone)]
pub struct IndexerManager {
    settings: Arc<Settings>,
    ctx: IndexingContext,
    objects: Arc<dyn ObjectStore>,
    registry: IndexerRegistry,
    hooks: Arc<dyn IndexerHooks>,
    publish_hooks: Arc<dyn PublishHooks>,
    snapshot_delay: Duration,
}

impl IndexerManager {
    pub fn new(
        settings: Settings,
        ctx: IndexingContext,
        objects: Arc<dyn ObjectStore>,
    ) -> Result<Self, IndexerError> {
        let registry = IndexerRegistry::from_selection(&settings.indexer_select)?;
        let snapshot_delay = Duration::from_secs(settings.monitor_snapshot_delay_secs);
        info!(
            envs = settings.env.len(),
            kinds = ?registry.kinds(),
            "Indexer manager initialized"
        );
        Ok(Self {
            settings: Arc::new(settings),
            ctx,
            objects,
            registry,
            hooks: Arc::new(DefaultHooks),
            publish_hooks: Arc::new(DefaultHooks),
            snapshot_delay,
        })
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn IndexerHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_publish_hooks(mut self, hooks: Arc<dyn PublishHooks>) -> Self {
        self.publish_hooks = hooks;
        self
    }

    pub fn with_registry(mut self, registry: IndexerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Override the delay between two snapshot status checks.
    pub fn with_snapshot_delay(mut self, delay: Duration) -> Self {
        self.snapshot_delay = delay;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &IndexerRegistry {
        &self.registry
    }

    pub fn environment(&self, name: &str) -> Result<IndexerEnv, IndexerError> {
        let config = self.settings.environment(name)?;
        Ok(IndexerEnv::new(name, config.clone()))
    }

    /// Configured environments, or only `env` when given.
    pub fn index_info(&self, env: Option<&str>) -> Result<BTreeMap<String, EnvConfig>, IndexerError> {
        match env {
            Some(name) => {
                let config = self.settings.environment(name)?;
                Ok(BTreeMap::from([(name.to_string(), config.clone())]))
            }
            None => Ok(self.settings.env.clone()),
        }
    }

    /// Client for an arbitrary index in `env`, typed after the build
    /// document of the same name when there is one.
    async fn index_client(
        &self,
        env: &IndexerEnv,
        index: &str,
    ) -> Result<Arc<dyn IndexClient>, IndexerError> {
        let doc_type = self
            .ctx
            .builds
            .find_one(index)
            .await?
            .and_then(|b| b.build_config)
            .and_then(|c| c.doc_type)
            .unwrap_or_else(|| FALLBACK_DOC_TYPE.to_string());
        let args = &env.config.indexer;
        let params = ClientParams::new(&env.config.host, index, doc_type)
            .with_timeout_secs(args.timeout_secs)
            .with_max_retries(args.max_retries)
            .with_bulk_chunk_size(args.bulk_chunk_size);
        Ok(self.ctx.engine.client(&params)?)
    }

    /// Index a build in `env` with the indexer kind selected for it.
    ///
    /// Returns as soon as the job is running; the outcome is logged when
    /// the job completes and is also the handle's output.
    pub async fn index(
        &self,
        env: &str,
        request: IndexRequest,
    ) -> Result<JobHandle<Result<IndexReport, IndexerError>>, IndexerError> {
        let env = self.environment(env)?;
        let build = self.ctx.builds.find_one(&request.collection).await?;
        let base = Indexer::new(self.ctx.clone(), env.clone()).with_hooks(Arc::clone(&self.hooks));
        let indexer = self.registry.build(build.as_ref(), base)?;

        let target = request.collection.clone();
        let index_name = request.target_index();
        info!(
            target = %target,
            index = %index_name,
            env = %env.name,
            kind = indexer.kind(),
            "Dispatching index job"
        );
        let job = JobInfo::new(JobCategory::Indexer, format!("{}:{}", target, index_name))
            .with_step("index")
            .with_description(env.config.host.clone());

        let handle = self
            .ctx
            .jobs
            .submit(job, async move {
                let result = indexer.index(request).await;
                match &result {
                    Ok(report) => info!(
                        target = %target,
                        index = %index_name,
                        count = report.count,
                        "Done indexing"
                    ),
                    Err(e) => error!(
                        target = %target,
                        index = %index_name,
                        error = %e,
                        notify = true,
                        "Indexing job failed"
                    ),
                }
                result
            })
            .await;
        Ok(handle)
    }

    /// Snapshot `index` into `repository` and wait for a terminal state.
    ///
    /// `snapshot` defaults to the index name and `repository` to the
    /// configured one. Mode `purge` replaces a same-named snapshot.
    pub async fn snapshot(
        &self,
        env: &str,
        index: &str,
        snapshot: Option<&str>,
        mode: IndexMode,
        repository: Option<&str>,
    ) -> Result<JobHandle<Result<SnapshotState, IndexerError>>, IndexerError> {
        let env = self.environment(env)?;
        let snapshot = snapshot.unwrap_or(index).to_string();
        let repository = repository
            .map(str::to_string)
            .unwrap_or_else(|| self.settings.snapshot_repository.clone());
        let client = self.index_client(&env, index).await?;
        let host = env.config.host.clone();
        let delay = self.snapshot_delay;

        let job = JobInfo::new(JobCategory::IndexManager, index)
            .with_step("snapshot")
            .with_description(host.clone())
            .with_predicate(no_other(JobCategory::IndexManager));

        let handle = self
            .ctx
            .jobs
            .submit(job, async move {
                run_snapshot(client.as_ref(), &repository, &snapshot, mode, &host, delay).await
            })
            .await;
        Ok(handle)
    }

    /// Publish release metadata for a snapshot and register its version.
    pub async fn publish_snapshot(
        &self,
        request: PublishRequest,
    ) -> Result<JobHandle<Result<PublishReport, IndexerError>>, IndexerError> {
        if self.settings.hub_role != MASTER_ROLE {
            return Err(IndexerError::PublishPrecondition(format!(
                "hub role is '{}', only a master hub publishes releases",
                self.settings.hub_role
            )));
        }
        let env = self.environment(&request.env)?;
        let index = request
            .index
            .clone()
            .or_else(|| request.snapshot.clone())
            .ok_or_else(|| {
                IndexerError::Configuration("publish needs a snapshot or an index name".to_string())
            })?;
        let snapshot = request.snapshot.clone().unwrap_or_else(|| index.clone());
        let repository = request
            .repository
            .clone()
            .unwrap_or_else(|| self.settings.snapshot_repository.clone());
        let release_folder = match (&request.release_folder, &request.prev) {
            (Some(folder), _) => Some(folder.clone()),
            (None, Some(prev)) => Some(release_folder_for(
                &hub_types::config::expand_home(&self.settings.release_path),
                prev,
                &index,
            )),
            (None, None) => None,
        };
        let client = self.index_client(&env, &index).await?;

        let publisher = Publisher {
            settings: Arc::clone(&self.settings),
            objects: Arc::clone(&self.objects),
            hooks: Arc::clone(&self.publish_hooks),
            jobs: self.ctx.jobs.clone(),
            client,
            args: PostPublishArgs {
                env: env.name.clone(),
                folder: request.folder.clone(),
                prev: request.prev.clone(),
                snapshot: snapshot.clone(),
                release_folder,
                index,
                repository,
            },
        };
        let steps = request.steps;
        let job = JobInfo::new(JobCategory::IndexManager, snapshot.clone())
            .with_step("publish")
            .with_predicate(no_other(JobCategory::IndexManager));

        let handle = self
            .ctx
            .jobs
            .submit(job, async move {
                let result = publisher.run(steps).await;
                match &result {
                    Ok(report) => info!(
                        snapshot = %report.snapshot,
                        version = ?report.version,
                        notify = true,
                        "Snapshot published"
                    ),
                    Err(e) => error!(
                        snapshot = %snapshot,
                        error = %e,
                        notify = true,
                        "Failed to publish snapshot"
                    ),
                }
                result
            })
            .await;
        Ok(handle)
    }

    /// Check that the engine accepts `mapping` by creating a throwaway
    /// index with it. The index is always deleted afterwards.
    pub async fn validate_mapping(&self, mapping: &Value, env: &str) -> Result<(), IndexerError> {
        let env = self.environment(env)?;
        let index_name = temporary_index_name();
        let client = self.index_client(&env, &index_name).await?;
        let settings = self.hooks.index_creation_settings();
        info!(index = %index_name, host = %env.config.host, "Testing mapping");

        let created = client.create_index(mapping, &settings).await;
        if let Err(e) = &created {
            error!(index = %index_name, error = %e, "Mapping rejected");
        }
        if let Err(e) = client.delete_index().await {
            warn!(index = %index_name, error = %e, "Could not delete temporary index");
        }
        created.map_err(Into::into)
    }

    /// Replace the mapping `_meta` of `index`.
    pub async fn update_metadata(
        &self,
        env: &str,
        index: &str,
        source: MetaSource,
    ) -> Result<Value, IndexerError> {
        let env = self.environment(env)?;
        let meta = match source {
            MetaSource::Build(name) => self
                .ctx
                .builds
                .find_one(&name)
                .await?
                .ok_or_else(|| HubError::NotFound(format!("build '{}'", name)))?
                .meta
                .to_value(),
            MetaSource::Explicit(value) => value,
        };
        if meta.is_null() {
            return Err(IndexerError::Configuration("no _meta to write".to_string()));
        }
        let client = self.index_client(&env, index).await?;
        client.update_mapping_meta(&meta).await?;
        info!(index = %index, env = %env.name, "Index metadata updated");
        Ok(meta)
    }
}

async fn run_snapshot(
    client: &dyn IndexClient,
    repository: &str,
    snapshot: &str,
    mode: IndexMode,
    host: &str,
    delay: Duration,
) -> Result<SnapshotState, IndexerError> {
    client.get_repository(repository).await?;
    info!(
        index = %client.index_name(),
        host = %host,
        repository = %repository,
        snapshot = %snapshot,
        "Creating snapshot"
    );
    match client
        .snapshot_create(repository, snapshot, mode == IndexMode::Purge)
        .await
    {
        Ok(res) => info!(snapshot = %snapshot, response = %res, "Snapshot launched"),
        Err(e) => {
            error!(snapshot = %snapshot, error = %e, notify = true, "Error while launching snapshot");
            return Err(e.into());
        }
    }
    monitor_snapshot(client, repository, snapshot, host, delay).await
}

/// Poll until the snapshot leaves its pending states.
async fn monitor_snapshot(
    client: &dyn IndexClient,
    repository: &str,
    snapshot: &str,
    host: &str,
    delay: Duration,
) -> Result<SnapshotState, IndexerError> {
    loop {
        let state = match client.snapshot_status(repository, snapshot).await {
            Ok(state) => state,
            Err(e) => {
                warn!(snapshot = %snapshot, error = %e, "Snapshot status lookup failed");
                SnapshotState::Failed
            }
        };
        if state.is_pending() {
            tokio::time::sleep(delay).await;
            continue;
        }
        if state == SnapshotState::Success {
            info!(
                snapshot = %snapshot,
                host = %host,
                repository = %repository,
                notify = true,
                "Snapshot successfully created"
            );
            return Ok(state);
        }
        error!(
            snapshot = %snapshot,
            host = %host,
            repository = %repository,
            state = %state,
            notify = true,
            "Failed creating snapshot"
        );
        return Err(IndexerError::SnapshotFailure {
            snapshot: snapshot.to_string(),
            state: state.to_string(),
        });
    }
}

/// Everything a publish job needs, moved into the job.
struct Publisher {
    settings: Arc<Settings>,
    objects: Arc<dyn ObjectStore>,
    hooks: Arc<dyn PublishHooks>,
    jobs: hub_scheduler::JobManager,
    client: Arc<dyn IndexClient>,
    args: PostPublishArgs,
}

impl Publisher {
    async fn run(self, steps: PublishSteps) -> Result<PublishReport, IndexerError> {
        let mut report = PublishReport {
            snapshot: self.args.snapshot.clone(),
            ..PublishReport::default()
        };
        if steps.meta {
            let (version, url) = self.publish_meta().await?;
            report.version = Some(version);
            report.url = Some(url);
        }
        if steps.post {
            info!(snapshot = %self.args.snapshot, "Running post-publish step");
            let hooks = Arc::clone(&self.hooks);
            let args = self.args.clone();
            let job = JobInfo::new(JobCategory::IndexManager, self.args.snapshot.clone())
                .with_step("post");
            let handle = self
                .jobs
                .defer_to_thread(job, move || hooks.post_publish(&args))
                .await;
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(IndexerError::PostPublish(e.to_string())),
                Err(e) => return Err(IndexerError::PostPublish(e.to_string())),
            }
        }
        Ok(report)
    }

    async fn publish_meta(&self) -> Result<(String, String), IndexerError> {
        let index = self.client.index_name().to_string();
        let raw_meta = self.client.get_mapping_meta().await?;
        let meta: BuildMeta = if raw_meta.is_null() {
            BuildMeta::default()
        } else {
            serde_json::from_value(raw_meta)?
        };
        let version = meta.build_version.clone().ok_or_else(|| {
            IndexerError::PublishPrecondition(format!(
                "can't retrieve a build version from index '{}'",
                index
            ))
        })?;
        info!(version = %version, index = %index, "Generating metadata for full release");

        if self.settings.skip_check_versions {
            info!("Version checks skipped");
        } else {
            check_versions(&self.settings.versions)?;
        }

        let repository = self.client.get_repository(&self.args.repository).await?;
        let mut release = ReleaseMetadata::full(
            version.clone(),
            &self.settings.versions,
            SnapshotLocation {
                repository,
                snapshot_name: self.args.snapshot.clone(),
            },
        );

        match &self.args.release_folder {
            Some(folder) if tokio::fs::try_exists(folder).await? => {
                let changes =
                    upload_release_notes(self.objects.as_ref(), folder, &self.args.folder, &version)
                        .await?;
                release = release.with_changes(changes);
            }
            _ => info!("No release folder found, no release notes will be published"),
        }

        let diff_path = hub_types::config::expand_home(&self.settings.diff_path);
        let url = upload_release_metadata(
            self.objects.as_ref(),
            &diff_path,
            &self.args.folder,
            &release,
            meta.parsed_build_date(),
        )
        .await?;
        info!(url = %url, "Full release metadata published");

        register_version(self.objects.as_ref(), &self.args.folder, release.version_info(url.clone()))
            .await?;
        info!(version = %version, "Registered version");
        Ok((version, url))
    }
}
