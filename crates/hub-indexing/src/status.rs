//! Job status persisted on build documents.
//!
//! A step opens with a transient [`JobRecord`] appended to the document's
//! job log, can be updated in place while running, and is finalized exactly
//! once. Index information is merged into both the job record and the
//! document's per-index map. Updates are read-modify-replace on the whole
//! document; one job per build document is assumed.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use hub_storage::BuildStore;
use hub_types::{BuildDocument, IndexInfo, JobRecord, JobStatus};

use crate::error::IndexerError;

/// A step opened by [`StatusTracker::start_step`].
#[derive(Debug, Clone)]
pub struct StepHandle {
    pub build_id: String,
    pub index_name: String,
    pub step: String,
    started: Instant,
}

impl StepHandle {
    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}

/// Terminal outcome of a step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Success { count: u64 },
    Failed { err: String },
}

#[derive(Clone)]
pub struct StatusTracker {
    builds: Arc<dyn BuildStore>,
}

impl StatusTracker {
    pub fn new(builds: Arc<dyn BuildStore>) -> Self {
        Self { builds }
    }

    /// Append a transient record for `step` and register the target index.
    pub async fn start_step(
        &self,
        build_id: &str,
        step: &str,
        info: IndexInfo,
        logfile: Option<String>,
    ) -> Result<StepHandle, IndexerError> {
        let index_name = info.index_name.clone().unwrap_or_default();
        let mut job = JobRecord::transient(step);
        job.logfile = logfile;
        job.index = Some(info.clone());
        self.builds.push_job(build_id, job).await?;

        let mut doc = self.load(build_id).await?;
        merge_index(&mut doc, &index_name, &info);
        self.builds.replace(&doc).await?;

        debug!(build = %build_id, step = %step, index = %index_name, "Step started");
        Ok(StepHandle {
            build_id: build_id.to_string(),
            index_name,
            step: step.to_string(),
            started: Instant::now(),
        })
    }

    /// Merge `info` into the running record without finalizing it.
    pub async fn update_step(&self, handle: &StepHandle, info: &IndexInfo) -> Result<(), IndexerError> {
        let mut doc = self.load(&handle.build_id).await?;
        match doc.jobs.last_mut() {
            Some(job) if job.is_transient() => {
                job.index.get_or_insert_with(IndexInfo::default).merge_from(info);
            }
            _ => warn!(build = %handle.build_id, "No transient job record to update"),
        }
        merge_index(&mut doc, &handle.index_name, info);
        self.builds.replace(&doc).await?;
        Ok(())
    }

    /// Finalize the last record with `outcome`.
    pub async fn finish_step(
        &self,
        handle: &StepHandle,
        outcome: &StepOutcome,
    ) -> Result<(), IndexerError> {
        let mut doc = self.load(&handle.build_id).await?;
        let mut info = IndexInfo {
            created_at: Some(Utc::now()),
            ..IndexInfo::default()
        };
        let (status, err) = match outcome {
            StepOutcome::Success { count } => {
                info.count = Some(*count);
                (JobStatus::Success, None)
            }
            StepOutcome::Failed { err } => (JobStatus::Failed, Some(err.clone())),
        };

        match doc.jobs.last_mut() {
            Some(job) if job.is_transient() => {
                job.finalize(status, handle.elapsed());
                job.err = err;
                job.index.get_or_insert_with(IndexInfo::default).merge_from(&info);
            }
            _ => {
                return Err(IndexerError::Configuration(format!(
                    "build document '{}' has no running job to finalize",
                    handle.build_id
                )))
            }
        }
        merge_index(&mut doc, &handle.index_name, &info);
        self.builds.replace(&doc).await?;

        info!(
            build = %handle.build_id,
            index = %handle.index_name,
            step = %handle.step,
            status = %status,
            "Step finished"
        );
        Ok(())
    }

    async fn load(&self, build_id: &str) -> Result<BuildDocument, IndexerError> {
        self.builds.find_one(build_id).await?.ok_or_else(|| {
            IndexerError::Configuration(format!("no build document named '{}'", build_id))
        })
    }
}

fn merge_index(doc: &mut BuildDocument, index_name: &str, info: &IndexInfo) {
    if index_name.is_empty() {
        return;
    }
    doc.index
        .entry(index_name.to_string())
        .or_default()
        .merge_from(info);
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_storage::MemoryStore;

    fn target_info() -> IndexInfo {
        IndexInfo {
            host: Some("localhost:9200".to_string()),
            environment: Some("local".to_string()),
            index_name: Some("genes_idx".to_string()),
            doc_type: Some("gene".to_string()),
            ..IndexInfo::default()
        }
    }

    async fn tracker_with_build() -> (Arc<MemoryStore>, StatusTracker) {
        let store = Arc::new(MemoryStore::new());
        store.replace(&BuildDocument::new("genes_build1")).await.unwrap();
        let tracker = StatusTracker::new(store.clone());
        (store, tracker)
    }

    #[tokio::test]
    async fn test_start_then_success() {
        let (store, tracker) = tracker_with_build().await;
        let handle = tracker
            .start_step("genes_build1", "index", target_info(), Some("index_genes.log".into()))
            .await
            .unwrap();

        let doc = store.find_one("genes_build1").await.unwrap().unwrap();
        let job = doc.last_job().unwrap();
        assert!(job.is_transient());
        assert!(job.pid.is_some());
        assert_eq!(job.status, JobStatus::Indexing);
        assert_eq!(job.logfile.as_deref(), Some("index_genes.log"));
        assert!(doc.index.contains_key("genes_idx"));

        tracker
            .finish_step(&handle, &StepOutcome::Success { count: 25 })
            .await
            .unwrap();

        let doc = store.find_one("genes_build1").await.unwrap().unwrap();
        let job = doc.last_job().unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert!(!job.is_transient());
        assert!(job.pid.is_none());
        assert!(job.time_in_s.is_some());
        let info = &doc.index["genes_idx"];
        assert_eq!(info.count, Some(25));
        assert!(info.created_at.is_some());
        assert_eq!(info.host.as_deref(), Some("localhost:9200"));
    }

    #[tokio::test]
    async fn test_failure_records_error() {
        let (store, tracker) = tracker_with_build().await;
        let handle = tracker
            .start_step("genes_build1", "index", target_info(), None)
            .await
            .unwrap();
        tracker
            .finish_step(
                &handle,
                &StepOutcome::Failed {
                    err: "Index 'genes_idx' already exists (mode: create)".into(),
                },
            )
            .await
            .unwrap();

        let doc = store.find_one("genes_build1").await.unwrap().unwrap();
        let job = doc.last_job().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.err.as_deref().unwrap().contains("already exists"));
        assert!(doc.index["genes_idx"].count.is_none());
    }

    #[tokio::test]
    async fn test_update_keeps_record_transient() {
        let (store, tracker) = tracker_with_build().await;
        let handle = tracker
            .start_step("genes_build1", "index", target_info(), None)
            .await
            .unwrap();
        let progress = IndexInfo {
            count: Some(10_000),
            ..IndexInfo::default()
        };
        tracker.update_step(&handle, &progress).await.unwrap();

        let doc = store.find_one("genes_build1").await.unwrap().unwrap();
        assert!(doc.last_job().unwrap().is_transient());
        assert_eq!(doc.index["genes_idx"].count, Some(10_000));
    }

    #[tokio::test]
    async fn test_missing_build_document() {
        let store = Arc::new(MemoryStore::new());
        let tracker = StatusTracker::new(store);
        assert!(tracker
            .start_step("nope", "index", target_info(), None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_finish_twice_is_rejected() {
        let (_store, tracker) = tracker_with_build().await;
        let handle = tracker
            .start_step("genes_build1", "index", target_info(), None)
            .await
            .unwrap();
        tracker
            .finish_step(&handle, &StepOutcome::Success { count: 1 })
            .await
            .unwrap();
        assert!(tracker
            .finish_step(&handle, &StepOutcome::Success { count: 1 })
            .await
            .is_err());
    }
}
