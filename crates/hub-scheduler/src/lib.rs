//! Job manager for the indexing hub.
//!
//! Provides a bounded worker pool for batch tasks, offload of blocking
//! hooks to dedicated threads, and a registry of running jobs that
//! predicates consult for mutual exclusion.
//!
//! # Example
//!
//! ```ignore
//! use hub_scheduler::{no_other, JobCategory, JobInfo, JobManager, JobManagerConfig};
//!
//! let jobs = JobManager::new(JobManagerConfig::default())?;
//!
//! let info = JobInfo::new(JobCategory::IndexManager, "genes_20240301")
//!     .with_step("snapshot")
//!     .with_predicate(no_other(JobCategory::IndexManager));
//! let handle = jobs.defer_to_worker(info, async { take_snapshot().await }).await?;
//! handle.await??;
//! ```

mod config;
mod error;
mod guard;
mod manager;
mod registry;

pub use config::JobManagerConfig;
pub use error::SchedulerError;
pub use guard::JobGuard;
pub use manager::{JobHandle, JobManager};
pub use registry::{no_other, JobCategory, JobInfo, JobPredicate, JobRegistry, RunningJob};
