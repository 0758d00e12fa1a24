//! # hub-types
//!
//! Shared domain types for the index hub.
//!
//! This crate defines the core data structures used throughout the system:
//! - Build documents: per-build configuration, mapping, metadata and job log
//! - Job records: one entry per indexing attempt-step
//! - Index descriptors and client parameters: how a worker reaches an index
//! - Batch tasks: the serializable unit of work dispatched to workers
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use hub_types::{BuildDocument, IndexMode};
//!
//! let doc = BuildDocument::new("genes_build1");
//! assert_eq!(doc.id, "genes_build1");
//! assert_eq!(IndexMode::default(), IndexMode::Create);
//! ```

pub mod build;
pub mod config;
pub mod error;
pub mod ids;
pub mod task;

pub use build::{
    merge_build_metadata, BuildConfig, BuildDocument, BuildMeta, Document, IndexInfo, JobRecord,
    JobStatus,
};
pub use config::{
    EnvConfig, IndexerArgs, IndexerSelect, ObjectStoreSettings, Settings, VersionStamps,
};
pub use error::HubError;
pub use ids::{clean_ids, CleanedIds, RejectedId, MAX_ID_BYTES};
pub use task::{BatchTask, ClientParams, IndexDescriptor, IndexMode, IndexSteps, WorkerKind};
