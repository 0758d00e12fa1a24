//! Whole-collection indexing.
//!
//! An [`Indexer`] resolves a build, decides whether the target index may be
//! created or reused, pages the collection ids into batches and dispatches
//! each batch to the worker pool. Results flow back into a [`BatchAggregate`]
//! owned by the run. The first failed batch stops further dispatch;
//! batches already running are awaited before the run is marked failed.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{future::BoxFuture, stream::FuturesUnordered, FutureExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use hub_scheduler::{JobCategory, JobInfo, SchedulerError};
use hub_search::{BulkOutcome, IndexClient};
use hub_storage::{DocumentStore, StorageError};
use hub_types::{
    clean_ids, BatchTask, BuildDocument, ClientParams, Document, EnvConfig, IndexInfo,
    IndexMode, IndexSteps, WorkerKind,
};

use crate::context::IndexingContext;
use crate::error::IndexerError;
use crate::hooks::{DefaultHooks, IndexerHooks, PostIndexArgs};
use crate::mapping::build_mapping;
use crate::source::{BuildSource, BuildTarget};
use crate::status::{StatusTracker, StepHandle, StepOutcome};
use crate::worker::BatchWorker;

pub const DEFAULT_BATCH_SIZE: usize = 10_000;

const STEP_INDEX: &str = "index";
const STEP_POST: &str = "post-index";

/// Parameters of one indexing run.
#[derive(Debug, Clone)]
pub struct IndexRequest {
    /// Build document / source collection name
    pub collection: String,
    /// Target index, defaults to the collection name
    pub index_name: Option<String>,
    /// Explicit ids, indexed as a single batch
    pub ids: Option<Vec<Value>>,
    pub mode: IndexMode,
    pub steps: IndexSteps,
    pub batch_size: usize,
}

impl IndexRequest {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            index_name: None,
            ids: None,
            mode: IndexMode::default(),
            steps: IndexSteps::all(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_index_name(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    pub fn with_ids(mut self, ids: Vec<Value>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_mode(mut self, mode: IndexMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_steps(mut self, steps: IndexSteps) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn target_index(&self) -> String {
        self.index_name
            .clone()
            .unwrap_or_else(|| self.collection.clone())
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexReport {
    pub index_name: String,
    pub count: u64,
    /// Batches that completed
    pub batches: usize,
}

impl IndexReport {
    /// `{index_name: count}`
    pub fn counts(&self) -> BTreeMap<String, u64> {
        BTreeMap::from([(self.index_name.clone(), self.count)])
    }
}

/// Something that can index a build.
#[async_trait]
pub trait BuildIndexer: Send + Sync {
    /// Registry name of this indexer kind.
    fn kind(&self) -> &'static str;

    async fn index(&self, request: IndexRequest) -> Result<IndexReport, IndexerError>;
}

/// Named search environment an indexer writes to.
#[derive(Debug, Clone)]
pub struct IndexerEnv {
    pub name: String,
    pub config: EnvConfig,
}

impl IndexerEnv {
    pub fn new(name: impl Into<String>, config: EnvConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

/// Running totals of a run's batches.
#[derive(Debug, Default)]
pub struct BatchAggregate {
    pub count: u64,
    pub batches: usize,
    pub rejected_docs: usize,
    pub failure: Option<IndexerError>,
}

type BatchResult = Result<Result<BulkOutcome, IndexerError>, SchedulerError>;

impl BatchAggregate {
    /// Fold one finished batch in. Only the first failure is kept.
    pub fn absorb(mut self, batch: usize, result: BatchResult) -> Self {
        match result {
            Ok(Ok(outcome)) => {
                self.count += outcome.count;
                self.batches += 1;
                self.rejected_docs += outcome.errors.len();
            }
            Ok(Err(e)) => self = self.fail(batch, e.to_string()),
            Err(e) => self = self.fail(batch, e.to_string()),
        }
        self
    }

    fn fail(mut self, batch: usize, reason: String) -> Self {
        if self.failure.is_none() {
            self.failure = Some(IndexerError::BatchFailure { batch, reason });
        }
        self
    }

    pub fn has_failed(&self) -> bool {
        self.failure.is_some()
    }

    fn into_result(self) -> Result<Self, IndexerError> {
        match self.failure {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

/// Yields the id pages of one collection pass.
enum IdPager {
    Explicit(Option<Vec<Value>>),
    Store {
        documents: Arc<dyn DocumentStore>,
        collection: String,
        cursor: Option<String>,
        done: bool,
        batch_size: usize,
    },
}

impl IdPager {
    async fn next_page(&mut self) -> Result<Option<Vec<Value>>, StorageError> {
        match self {
            IdPager::Explicit(ids) => Ok(ids.take()),
            IdPager::Store {
                documents,
                collection,
                cursor,
                done,
                batch_size,
            } => {
                if *done {
                    return Ok(None);
                }
                let page = documents
                    .page_ids(collection, cursor.as_deref(), *batch_size)
                    .await?;
                *done = page.next.is_none();
                *cursor = page.next;
                if page.ids.is_empty() {
                    *done = true;
                    return Ok(None);
                }
                Ok(Some(page.ids))
            }
        }
    }
}

/// Progress label carried by each batch job.
pub fn progress_label(batch: usize, total: usize) -> String {
    let total = total.max(1);
    let pct = batch as f64 / total as f64 * 100.0;
    format!("#{}/{} ({:.1}%)", batch, total, pct)
}

/// Running step that completed batches are reported to.
#[derive(Debug, Clone, Copy)]
pub struct StepProgress<'a> {
    pub handle: &'a StepHandle,
    /// Documents counted by earlier phases of the same step
    pub offset: u64,
}

/// The plain indexer.
#[derive(Clone)]
pub struct Indexer {
    ctx: IndexingContext,
    env: IndexerEnv,
    hooks: Arc<dyn IndexerHooks>,
    worker: BatchWorker,
    status: StatusTracker,
}

impl Indexer {
    pub fn new(ctx: IndexingContext, env: IndexerEnv) -> Self {
        let worker = BatchWorker::new(
            Arc::clone(&ctx.documents),
            Arc::clone(&ctx.engine),
            ctx.log_folder.clone(),
        );
        let status = StatusTracker::new(Arc::clone(&ctx.builds));
        Self {
            ctx,
            env,
            hooks: Arc::new(DefaultHooks),
            worker,
            status,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn IndexerHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn env(&self) -> &IndexerEnv {
        &self.env
    }

    pub fn context(&self) -> &IndexingContext {
        &self.ctx
    }

    pub fn hooks(&self) -> &Arc<dyn IndexerHooks> {
        &self.hooks
    }

    pub(crate) async fn load_build(&self, name: &str) -> Result<BuildDocument, IndexerError> {
        self.ctx.builds.find_one(name).await?.ok_or_else(|| {
            IndexerError::Configuration(format!("no build document named '{}'", name))
        })
    }

    /// Client parameters for writing `index_name` from a build.
    pub fn client_params(&self, target: &BuildTarget, index_name: &str) -> ClientParams {
        let args = &self.env.config.indexer;
        ClientParams::new(&self.env.config.host, index_name, &target.doc_type)
            .with_shards(target.num_shards, target.num_replicas)
            .with_bulk_chunk_size(args.bulk_chunk_size)
            .with_timeout_secs(args.timeout_secs)
            .with_max_retries(args.max_retries)
    }

    /// Run every requested step against `source`, recording status on its
    /// addressable build document.
    pub async fn run(
        &self,
        source: BuildSource,
        request: IndexRequest,
    ) -> Result<IndexReport, IndexerError> {
        let status_doc = source.status_document();
        let target = BuildTarget::resolve(status_doc)?;
        let index_name = request.target_index();
        let params = self.client_params(&target, &index_name);
        let info = IndexInfo {
            host: Some(self.env.config.host.clone()),
            environment: Some(self.env.name.clone()),
            conf_name: Some(target.conf_name.clone()),
            target_name: Some(source.name().to_string()),
            index_name: Some(index_name.clone()),
            doc_type: Some(target.doc_type.clone()),
            num_shards: Some(target.num_shards),
            num_replicas: Some(target.num_replicas),
            ..IndexInfo::default()
        };
        let build_id = status_doc.id.clone();
        let client = self.ctx.engine.client(&params)?;

        info!(
            build = %build_id,
            index = %index_name,
            env = %self.env.name,
            mode = %request.mode,
            "Indexing started"
        );

        let mut report = IndexReport {
            index_name: index_name.clone(),
            count: 0,
            batches: 0,
        };

        if request.steps.index {
            let (client_ref, source_ref, request_ref, params_ref) =
                (client.as_ref(), &source, &request, &params);
            let aggregate = self
                .tracked(&build_id, STEP_INDEX, info.clone(), move |handle| async move {
                    let aggregate = self
                        .index_step(client_ref, source_ref, request_ref, params_ref, &handle)
                        .await?;
                    Ok::<_, IndexerError>((aggregate.count, aggregate))
                })
                .await?;
            report.count = aggregate.count;
            report.batches = aggregate.batches;
        } else {
            report.count = client.count().await?;
        }

        if request.steps.post {
            let args = PostIndexArgs {
                collection: source.name().to_string(),
                index_name: index_name.clone(),
                mode: request.mode,
                batch_size: request.batch_size,
                ids: request
                    .ids
                    .as_ref()
                    .map(|ids| clean_ids(ids.clone()).ids),
                params: params.clone(),
            };
            let count = report.count;
            self.tracked(&build_id, STEP_POST, info, move |_| async move {
                self.post_index(args).await?;
                Ok::<_, IndexerError>((count, ()))
            })
            .await?;
        }

        info!(index = %index_name, count = report.count, "Indexing done");
        Ok(report)
    }

    /// Wrap `work` in a job record: opened transient, finalized with the
    /// returned count or the error. `work` gets the open step so it can
    /// report progress on it.
    async fn tracked<T, W, F>(
        &self,
        build_id: &str,
        step: &str,
        info: IndexInfo,
        work: W,
    ) -> Result<T, IndexerError>
    where
        W: FnOnce(StepHandle) -> F,
        F: Future<Output = Result<(u64, T), IndexerError>>,
    {
        let handle = self.status.start_step(build_id, step, info, None).await?;
        let result = work(handle.clone()).await;
        let outcome = match &result {
            Ok((count, _)) => StepOutcome::Success { count: *count },
            Err(e) => StepOutcome::Failed { err: e.to_string() },
        };
        if let Err(status_err) = self.status.finish_step(&handle, &outcome).await {
            error!(build = %build_id, step = %step, error = %status_err, "Could not record job status");
            if result.is_ok() {
                return Err(status_err);
            }
        }
        if let Err(e) = &result {
            error!(build = %build_id, step = %step, error = %e, notify = true, "Indexing step failed");
        }
        result.map(|(_, value)| value)
    }

    async fn index_step(
        &self,
        client: &dyn IndexClient,
        source: &BuildSource,
        request: &IndexRequest,
        params: &ClientParams,
        handle: &StepHandle,
    ) -> Result<BatchAggregate, IndexerError> {
        self.prepare_index(client, source, request.mode).await?;

        let mut total = BatchAggregate::default();
        for phase in source.phases(request.mode) {
            let progress = StepProgress {
                handle,
                offset: total.count,
            };
            let aggregate = self
                .index_collection(
                    &phase.collection,
                    request.ids.clone(),
                    phase.mode,
                    params,
                    request.batch_size,
                    Some(progress),
                )
                .await?;
            info!(
                collection = %phase.collection,
                index = %params.index_name,
                mode = %phase.mode,
                count = aggregate.count,
                "Collection indexed"
            );
            total.count += aggregate.count;
            total.batches += aggregate.batches;
            total.rejected_docs += aggregate.rejected_docs;
        }
        Ok(total)
    }

    /// Create the index, or decide whether an existing one may be used.
    pub async fn prepare_index(
        &self,
        client: &dyn IndexClient,
        source: &BuildSource,
        mode: IndexMode,
    ) -> Result<(), IndexerError> {
        let index = client.index_name().to_string();
        if client.index_exists().await? {
            match mode {
                IndexMode::Purge => {
                    warn!(index = %index, "Deleting existing index (purge)");
                    client.delete_index().await?;
                }
                m if m.reuses_index() => {
                    info!(index = %index, mode = %m, "Reusing existing index");
                    return Ok(());
                }
                m => {
                    return Err(IndexerError::IndexCollision {
                        index,
                        mode: m.to_string(),
                    })
                }
            }
        }
        let mapping = self
            .hooks
            .enrich_final_mapping(build_mapping(&source.properties(), &source.metadata()));
        let settings = self.hooks.index_creation_settings();
        client.create_index(&mapping, &settings).await?;
        info!(index = %index, "Index created");
        Ok(())
    }

    /// Page `collection` into batches and run them on the worker pool.
    /// With `progress`, the running count and batch label are written to the
    /// open step after every completed batch.
    pub async fn index_collection(
        &self,
        collection: &str,
        ids: Option<Vec<Value>>,
        mode: IndexMode,
        params: &ClientParams,
        batch_size: usize,
        progress: Option<StepProgress<'_>>,
    ) -> Result<BatchAggregate, IndexerError> {
        let batch_size = batch_size.max(1);
        let (mut pager, total_batches) = match ids {
            Some(ids) => (IdPager::Explicit(Some(ids)), 1),
            None => {
                let total = self.ctx.documents.count(collection).await?;
                let pager = IdPager::Store {
                    documents: Arc::clone(&self.ctx.documents),
                    collection: collection.to_string(),
                    cursor: None,
                    done: false,
                    batch_size,
                };
                (pager, total.div_ceil(batch_size as u64) as usize)
            }
        };
        let worker_kind = WorkerKind::for_mode(mode);

        let mut pending: FuturesUnordered<BoxFuture<'static, (usize, BatchResult)>> =
            FuturesUnordered::new();
        let mut aggregate = BatchAggregate::default();
        let mut batch_num = 0usize;

        loop {
            while let Some(Some((n, result))) = pending.next().now_or_never() {
                aggregate = self
                    .absorb_batch(aggregate, n, result, total_batches, progress)
                    .await;
            }
            if aggregate.has_failed() {
                warn!(collection = %collection, "Batch failed, no further batches dispatched");
                break;
            }

            let raw = match pager.next_page().await {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(e) => {
                    aggregate.failure.get_or_insert(IndexerError::Storage(e));
                    break;
                }
            };
            batch_num += 1;

            let cleaned = clean_ids(raw);
            for rejected in &cleaned.rejected {
                warn!(collection = %collection, batch = batch_num, id = %rejected, "Skipping invalid id");
            }
            if cleaned.dropped() > 0 {
                warn!(
                    collection = %collection,
                    batch = batch_num,
                    invalid = cleaned.rejected.len(),
                    duplicates = cleaned.duplicates,
                    "Ids dropped from batch"
                );
            }
            if cleaned.ids.is_empty() {
                continue;
            }

            let task = BatchTask::new(collection, cleaned.ids, params.clone(), batch_num, mode)
                .with_worker(worker_kind);
            let job = JobInfo::new(JobCategory::Batch, collection)
                .with_step(STEP_INDEX)
                .with_description(progress_label(batch_num, total_batches.max(batch_num)));
            let worker = self.worker.clone();
            match self
                .ctx
                .jobs
                .defer_to_worker(job, async move { worker.run(&task).await })
                .await
            {
                Ok(handle) => pending.push(async move { (batch_num, handle.await) }.boxed()),
                Err(e) => {
                    aggregate = aggregate.absorb(batch_num, Err(e));
                    break;
                }
            }
        }

        while let Some((n, result)) = pending.next().await {
            aggregate = self
                .absorb_batch(aggregate, n, result, total_batches, progress)
                .await;
        }
        if aggregate.rejected_docs > 0 {
            warn!(
                collection = %collection,
                rejected = aggregate.rejected_docs,
                "Engine rejected some documents"
            );
        }
        aggregate.into_result()
    }

    async fn absorb_batch(
        &self,
        aggregate: BatchAggregate,
        batch: usize,
        result: BatchResult,
        total_batches: usize,
        progress: Option<StepProgress<'_>>,
    ) -> BatchAggregate {
        let done = aggregate.batches;
        let aggregate = aggregate.absorb(batch, result);
        let Some(progress) = progress.filter(|_| aggregate.batches > done) else {
            return aggregate;
        };
        let label = progress_label(aggregate.batches, total_batches.max(aggregate.batches));
        let mut extra = Document::new();
        extra.insert("progress".to_string(), Value::String(label));
        let info = IndexInfo {
            count: Some(progress.offset + aggregate.count),
            extra,
            ..IndexInfo::default()
        };
        if let Err(e) = self.status.update_step(progress.handle, &info).await {
            warn!(build = %progress.handle.build_id, error = %e, "Could not record batch progress");
        }
        aggregate
    }

    async fn post_index(&self, args: PostIndexArgs) -> Result<(), IndexerError> {
        let hooks = Arc::clone(&self.hooks);
        let job = JobInfo::new(JobCategory::Indexer, args.collection.clone()).with_step(STEP_POST);
        let handle = self
            .ctx
            .jobs
            .defer_to_thread(job, move || hooks.post_index(&args))
            .await;
        match handle.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(IndexerError::PostIndex(e.to_string())),
            Err(e) => Err(IndexerError::PostIndex(e.to_string())),
        }
    }
}

#[async_trait]
impl BuildIndexer for Indexer {
    fn kind(&self) -> &'static str {
        "default"
    }

    async fn index(&self, request: IndexRequest) -> Result<IndexReport, IndexerError> {
        let build = self.load_build(&request.collection).await?;
        self.run(BuildSource::Single(build), request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use hub_storage::{BuildStore, MemoryStore};
    use hub_types::{JobRecord, JobStatus};
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_progress_label() {
        assert_eq!(progress_label(1, 3), "#1/3 (33.3%)");
        assert_eq!(progress_label(3, 3), "#3/3 (100.0%)");
        assert_eq!(progress_label(1, 0), "#1/1 (100.0%)");
    }

    #[test]
    fn test_aggregate_keeps_first_failure() {
        let agg = BatchAggregate::default()
            .absorb(
                1,
                Ok(Ok(BulkOutcome {
                    count: 10,
                    errors: vec![],
                })),
            )
            .absorb(2, Err(SchedulerError::WorkerTerminated("killed".into())))
            .absorb(3, Ok(Err(IndexerError::PostIndex("later".into()))));
        assert_eq!(agg.count, 10);
        match agg.failure {
            Some(IndexerError::BatchFailure { batch, reason }) => {
                assert_eq!(batch, 2);
                assert!(reason.contains("without a result"));
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fresh_index_counts_all_documents() {
        let fx = Fixture::new().await;
        fx.add_build("genes_build1", 25).await;

        let report = fx
            .indexer()
            .index(IndexRequest::new("genes_build1").with_batch_size(10))
            .await
            .unwrap();

        assert_eq!(report.count, 25);
        assert_eq!(report.batches, 3);
        assert_eq!(report.counts()["genes_build1"], 25);
        assert_eq!(fx.engine.doc_count("genes_build1"), 25);

        let build = fx.build("genes_build1").await;
        let job = build.last_job().unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(build.index["genes_build1"].count, Some(25));
        let mapping = fx.engine.index("genes_build1").unwrap().mapping;
        assert_eq!(mapping["properties"]["all"], json!({"type": "text"}));
        assert_eq!(mapping["dynamic"], json!("false"));
    }

    #[tokio::test]
    async fn test_existing_index_with_default_mode_is_untouched() {
        let fx = Fixture::new().await;
        fx.add_build("genes_build1", 3).await;
        fx.engine
            .seed_index("genes_build1", vec![json!({"_id": "keep"}).as_object().cloned().unwrap()]);

        let err = fx
            .indexer()
            .index(IndexRequest::new("genes_build1"))
            .await
            .unwrap_err();

        assert!(matches!(err, IndexerError::IndexCollision { .. }));
        assert_eq!(fx.engine.doc_count("genes_build1"), 1);
        assert!(fx.engine.deleted_indices().is_empty());
        let build = fx.build("genes_build1").await;
        assert_eq!(build.last_job().unwrap().status, JobStatus::Failed);
        assert!(build.last_job().unwrap().err.as_deref().unwrap().contains("already exists"));
    }

    #[tokio::test]
    async fn test_purge_recreates_index() {
        let fx = Fixture::new().await;
        fx.add_build("genes_build1", 3).await;
        fx.engine
            .seed_index("genes_build1", vec![json!({"_id": "stale"}).as_object().cloned().unwrap()]);

        let report = fx
            .indexer()
            .index(IndexRequest::new("genes_build1").with_mode(IndexMode::Purge))
            .await
            .unwrap();

        assert_eq!(report.count, 3);
        assert_eq!(fx.engine.doc_count("genes_build1"), 3);
        assert!(fx.engine.doc("genes_build1", "stale").is_none());
        assert_eq!(fx.engine.deleted_indices(), vec!["genes_build1".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_ids_are_dropped_not_fatal() {
        let fx = Fixture::new().await;
        fx.add_build("genes_build1", 2).await;

        let ids = vec![json!("g00000"), json!(42), json!("x".repeat(600)), json!("g00001")];
        let report = fx
            .indexer()
            .index(IndexRequest::new("genes_build1").with_ids(ids))
            .await
            .unwrap();

        assert_eq!(report.count, 2);
        assert_eq!(report.batches, 1);
    }

    #[tokio::test]
    async fn test_failed_batch_fails_run() {
        let fx = Fixture::with_engine(hub_search::MemoryEngine::new().with_failing_ids(["g00012"])).await;
        fx.add_build("genes_build1", 30).await;

        let err = fx
            .indexer()
            .index(IndexRequest::new("genes_build1").with_batch_size(10))
            .await
            .unwrap_err();

        assert!(matches!(err, IndexerError::BatchFailure { batch: 2, .. }));
        let build = fx.build("genes_build1").await;
        assert_eq!(build.last_job().unwrap().status, JobStatus::Failed);
        assert!(fx
            .log_dir()
            .join("index_genes_build1_genes_build1_batch_2.json")
            .exists());
    }

    #[tokio::test]
    async fn test_missing_build_is_configuration_error() {
        let fx = Fixture::new().await;
        let err = fx
            .indexer()
            .index(IndexRequest::new("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::Configuration(_)));
    }

    /// Build store that remembers the index info seen on every write made
    /// while the step is still running.
    struct ObservedBuilds {
        inner: Arc<MemoryStore>,
        running: Mutex<Vec<(Option<u64>, Option<Value>)>>,
    }

    #[async_trait]
    impl BuildStore for ObservedBuilds {
        async fn find_one(&self, id: &str) -> Result<Option<BuildDocument>, StorageError> {
            self.inner.find_one(id).await
        }

        async fn push_job(&self, id: &str, job: JobRecord) -> Result<(), StorageError> {
            self.inner.push_job(id, job).await
        }

        async fn replace(&self, doc: &BuildDocument) -> Result<(), StorageError> {
            if doc.last_job().is_some_and(|job| job.is_transient()) {
                if let Some(info) = doc.index.get("genes_build1") {
                    self.running
                        .lock()
                        .unwrap()
                        .push((info.count, info.extra.get("progress").cloned()));
                }
            }
            self.inner.replace(doc).await
        }
    }

    #[tokio::test]
    async fn test_running_step_reports_each_batch() {
        let fx = Fixture::new().await;
        fx.add_build("genes_build1", 25).await;
        let observed = Arc::new(ObservedBuilds {
            inner: fx.store.clone(),
            running: Mutex::new(Vec::new()),
        });
        let ctx = IndexingContext::new(
            observed.clone(),
            fx.store.clone(),
            Arc::new(fx.engine.clone()),
            fx.ctx.jobs.clone(),
            fx.log_dir(),
        );

        Indexer::new(ctx, Fixture::env())
            .index(
                IndexRequest::new("genes_build1")
                    .with_steps(IndexSteps::index_only())
                    .with_batch_size(10),
            )
            .await
            .unwrap();

        let running: Vec<_> = observed
            .running
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, progress)| progress.is_some())
            .cloned()
            .collect();
        let labels: Vec<_> = running.iter().map(|(_, p)| p.clone().unwrap()).collect();
        assert_eq!(
            labels,
            vec![json!("#1/3 (33.3%)"), json!("#2/3 (66.7%)"), json!("#3/3 (100.0%)")]
        );
        let counts: Vec<_> = running.iter().map(|(c, _)| c.unwrap()).collect();
        assert!(counts.windows(2).all(|w| w[0] < w[1]), "{counts:?}");
        assert_eq!(counts.last(), Some(&25));

        let build = observed.find_one("genes_build1").await.unwrap().unwrap();
        assert_eq!(build.last_job().unwrap().status, JobStatus::Success);
    }

    struct RecordingHooks {
        seen: Mutex<Vec<String>>,
    }

    impl IndexerHooks for RecordingHooks {
        fn post_index(&self, args: &PostIndexArgs) -> Result<(), IndexerError> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}->{}", args.collection, args.index_name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_post_hook_runs_after_index() {
        let fx = Fixture::new().await;
        fx.add_build("genes_build1", 2).await;
        let hooks = Arc::new(RecordingHooks {
            seen: Mutex::new(Vec::new()),
        });

        fx.indexer()
            .with_hooks(hooks.clone())
            .index(IndexRequest::new("genes_build1").with_index_name("genes_v1"))
            .await
            .unwrap();

        assert_eq!(*hooks.seen.lock().unwrap(), vec!["genes_build1->genes_v1".to_string()]);
        let build = fx.build("genes_build1").await;
        let steps: Vec<_> = build.jobs.iter().filter_map(|j| j.step.clone()).collect();
        assert_eq!(steps, vec!["index".to_string(), "post-index".to_string()]);
    }

    struct FailingPost;

    impl IndexerHooks for FailingPost {
        fn post_index(&self, _args: &PostIndexArgs) -> Result<(), IndexerError> {
            Err(IndexerError::Configuration("alias missing".into()))
        }
    }

    #[tokio::test]
    async fn test_post_failure_after_successful_index() {
        let fx = Fixture::new().await;
        fx.add_build("genes_build1", 2).await;

        let err = fx
            .indexer()
            .with_hooks(Arc::new(FailingPost))
            .index(IndexRequest::new("genes_build1"))
            .await
            .unwrap_err();

        assert!(matches!(err, IndexerError::PostIndex(_)));
        assert_eq!(fx.engine.doc_count("genes_build1"), 2);
        let build = fx.build("genes_build1").await;
        assert_eq!(build.jobs[0].status, JobStatus::Success);
        assert_eq!(build.jobs[1].status, JobStatus::Failed);
    }
}
