//! Job manager: bounded worker pool plus thread offload.
//!
//! Every deferred job is registered in the [`JobRegistry`] first. A job whose
//! predicates fail waits, re-checking whenever another job is released and at
//! the configured poll interval, until it is admitted.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::JobManagerConfig;
use crate::error::SchedulerError;
use crate::guard::JobGuard;
use crate::registry::{JobInfo, JobRegistry, RunningJob};

/// Handle to a deferred job.
///
/// Resolves to the job's output, or to `SchedulerError::WorkerTerminated`
/// when the task panicked.
pub struct JobHandle<T> {
    id: Uuid,
    inner: JoinHandle<T>,
}

impl<T> JobHandle<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T, SchedulerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner)
            .poll(cx)
            .map(|res| res.map_err(SchedulerError::from))
    }
}

/// Worker pool and running-job registry.
#[derive(Clone)]
pub struct JobManager {
    registry: Arc<JobRegistry>,
    workers: Arc<Semaphore>,
    max_workers: usize,
    poll_interval: Duration,
}

impl JobManager {
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` for a zero-sized pool.
    pub fn new(config: JobManagerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        info!(
            max_workers = config.max_workers,
            poll_ms = config.predicate_poll_ms,
            "Job manager initialized"
        );
        Ok(Self {
            registry: Arc::new(JobRegistry::new()),
            workers: Arc::new(Semaphore::new(config.max_workers)),
            max_workers: config.max_workers,
            poll_interval: config.predicate_poll_interval(),
        })
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn running_jobs(&self) -> Vec<RunningJob> {
        self.registry.running()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// Wait until `info`'s predicates pass, then enter it in the running set.
    pub async fn register(&self, info: JobInfo) -> JobGuard {
        let mut waiting = false;
        loop {
            let released = self.registry.released();
            if let Some(guard) = self.registry.try_register(&info) {
                if waiting {
                    debug!(category = %info.category, source = %info.source, "Job admitted");
                }
                return guard;
            }
            if !waiting {
                info!(
                    category = %info.category,
                    source = %info.source,
                    "Job waiting for running jobs to finish"
                );
                waiting = true;
            }
            let _ = tokio::time::timeout(self.poll_interval, released).await;
        }
    }

    /// Run `task` on the worker pool.
    ///
    /// Waits for admission and for a free worker slot before spawning, so
    /// callers dispatching in a loop are throttled to the pool size.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Closed` after [`close`](Self::close).
    pub async fn defer_to_worker<F, T>(
        &self,
        info: JobInfo,
        task: F,
    ) -> Result<JobHandle<T>, SchedulerError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.register(info).await;
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| SchedulerError::Closed)?;
        let id = guard.id();
        let inner = tokio::spawn(async move {
            let _guard = guard;
            let _permit = permit;
            task.await
        });
        Ok(JobHandle { id, inner })
    }

    /// Run an orchestration task on the runtime without taking a pool slot.
    ///
    /// Used for jobs that themselves dispatch to the worker pool.
    pub async fn submit<F, T>(&self, info: JobInfo, task: F) -> JobHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.register(info).await;
        let id = guard.id();
        let inner = tokio::spawn(async move {
            let _guard = guard;
            task.await
        });
        JobHandle { id, inner }
    }

    /// Run a blocking closure on a dedicated thread.
    ///
    /// Unlike worker jobs this does not take a pool slot.
    pub async fn defer_to_thread<F, T>(&self, info: JobInfo, func: F) -> JobHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.register(info).await;
        let id = guard.id();
        let inner = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            func()
        });
        JobHandle { id, inner }
    }

    /// Stop handing out worker slots. Running jobs are not affected.
    pub fn close(&self) {
        self.workers.close();
    }
}
