//! Registry of running jobs.
//!
//! Every deferred job is entered here for as long as it runs. Registration is
//! check-and-insert under one write lock, so predicates like "no other
//! snapshot is running" cannot race with a concurrent registration.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::guard::JobGuard;

/// Kind of job, used by predicates for mutual exclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCategory {
    /// A whole-collection indexing run
    Indexer,
    /// Snapshot and publish operations
    IndexManager,
    /// One batch of an indexing run
    Batch,
}

impl fmt::Display for JobCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobCategory::Indexer => write!(f, "indexer"),
            JobCategory::IndexManager => write!(f, "index_manager"),
            JobCategory::Batch => write!(f, "batch"),
        }
    }
}

/// A job currently registered with the manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunningJob {
    pub id: Uuid,
    pub category: JobCategory,
    /// What the job works on, e.g. a collection or index name
    pub source: String,
    pub step: Option<String>,
    pub description: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Condition over the running set that must hold before a job may start.
pub type JobPredicate = Arc<dyn Fn(&[RunningJob]) -> bool + Send + Sync>;

/// Predicate passing only when no job of `category` is running.
pub fn no_other(category: JobCategory) -> JobPredicate {
    Arc::new(move |jobs: &[RunningJob]| !jobs.iter().any(|j| j.category == category))
}

/// Description of a job about to be deferred.
#[derive(Clone)]
pub struct JobInfo {
    pub category: JobCategory,
    pub source: String,
    pub step: Option<String>,
    pub description: Option<String>,
    pub(crate) predicates: Vec<JobPredicate>,
}

impl JobInfo {
    pub fn new(category: JobCategory, source: impl Into<String>) -> Self {
        Self {
            category,
            source: source.into(),
            step: None,
            description: None,
            predicates: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_predicate(mut self, predicate: JobPredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    fn admits(&self, running: &[RunningJob]) -> bool {
        self.predicates.iter().all(|p| p(running))
    }
}

impl fmt::Debug for JobInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobInfo")
            .field("category", &self.category)
            .field("source", &self.source)
            .field("step", &self.step)
            .field("description", &self.description)
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

/// Thread-safe set of running jobs.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, RunningJob>>,
    released: Notify,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, RunningJob>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, RunningJob>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `info` if all its predicates pass against the current set.
    pub(crate) fn try_register(self: &Arc<Self>, info: &JobInfo) -> Option<JobGuard> {
        let mut jobs = self.write();
        let running: Vec<RunningJob> = jobs.values().cloned().collect();
        if !info.admits(&running) {
            return None;
        }
        let job = RunningJob {
            id: Uuid::new_v4(),
            category: info.category,
            source: info.source.clone(),
            step: info.step.clone(),
            description: info.description.clone(),
            started_at: Utc::now(),
        };
        let id = job.id;
        jobs.insert(id, job);
        Some(JobGuard::new(Arc::clone(self), id))
    }

    pub(crate) fn remove(&self, id: &Uuid) {
        self.write().remove(id);
        self.released.notify_waiters();
    }

    /// Future resolving at the next job release.
    pub(crate) fn released(&self) -> Notified<'_> {
        self.released.notified()
    }

    /// Running jobs, oldest first.
    pub fn running(&self) -> Vec<RunningJob> {
        let mut jobs: Vec<RunningJob> = self.read().values().cloned().collect();
        jobs.sort_by_key(|j| j.started_at);
        jobs
    }

    pub fn is_running(&self, id: &Uuid) -> bool {
        self.read().contains_key(id)
    }

    pub fn count(&self, category: JobCategory) -> usize {
        self.read()
            .values()
            .filter(|j| j.category == category)
            .count()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_release() {
        let registry = Arc::new(JobRegistry::new());
        let info = JobInfo::new(JobCategory::Indexer, "genes_build1").with_step("index");

        let guard = registry.try_register(&info).unwrap();
        assert_eq!(registry.len(), 1);
        let running = registry.running();
        assert_eq!(running[0].source, "genes_build1");
        assert_eq!(running[0].step.as_deref(), Some("index"));
        assert!(registry.is_running(&guard.id()));

        drop(guard);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_no_other_predicate_blocks_same_category() {
        let registry = Arc::new(JobRegistry::new());
        let snapshot = JobInfo::new(JobCategory::IndexManager, "snap")
            .with_predicate(no_other(JobCategory::IndexManager));

        let first = registry.try_register(&snapshot).unwrap();
        assert!(registry.try_register(&snapshot).is_none());

        // other categories are unaffected
        let batch = JobInfo::new(JobCategory::Batch, "genes");
        assert!(registry.try_register(&batch).is_some());

        drop(first);
        assert!(registry.try_register(&snapshot).is_some());
    }

    #[test]
    fn test_count_by_category() {
        let registry = Arc::new(JobRegistry::new());
        let _a = registry
            .try_register(&JobInfo::new(JobCategory::Batch, "a"))
            .unwrap();
        let _b = registry
            .try_register(&JobInfo::new(JobCategory::Batch, "b"))
            .unwrap();
        let _c = registry
            .try_register(&JobInfo::new(JobCategory::Indexer, "c"))
            .unwrap();
        assert_eq!(registry.count(JobCategory::Batch), 2);
        assert_eq!(registry.count(JobCategory::Indexer), 1);
        assert_eq!(registry.count(JobCategory::IndexManager), 0);
    }

    #[test]
    fn test_category_serialization() {
        let json = serde_json::to_string(&JobCategory::IndexManager).unwrap();
        assert_eq!(json, "\"index_manager\"");
        assert_eq!(JobCategory::IndexManager.to_string(), "index_manager");
    }
}
