//! Batch indexing pipeline for the index hub.
//!
//! This crate turns a versioned document collection into a search index and
//! manages the index lifecycle afterwards.
//!
//! ## Key Components
//!
//! - [`BatchWorker`]: indexes one batch of ids (fresh, merge or resume)
//! - [`StatusTracker`]: records job progress on the build document
//! - [`Indexer`]: partitions a collection into batches and aggregates results
//! - [`ColdHotIndexer`]: indexes a cold collection, then merges the hot one
//! - [`IndexerManager`]: indexer selection, snapshots and release publishing
//!
//! ## Example
//!
//! ```ignore
//! use hub_indexing::{IndexRequest, IndexerManager, IndexingContext};
//!
//! let manager = IndexerManager::new(settings, ctx, objects)?;
//! let job = manager
//!     .index("prod", IndexRequest::new("genes_build1").with_batch_size(10_000))
//!     .await?;
//! let report = job.await??;
//! println!("{:?}", report.counts());
//! ```

pub mod coldhot;
pub mod context;
pub mod error;
pub mod hooks;
pub mod indexer;
pub mod manager;
pub mod mapping;
pub mod registry;
pub mod release;
pub mod source;
pub mod status;
pub mod worker;

#[cfg(test)]
mod testing;

pub use coldhot::ColdHotIndexer;
pub use context::IndexingContext;
pub use error::IndexerError;
pub use hooks::{DefaultHooks, IndexerHooks, PostIndexArgs, PostPublishArgs, PublishHooks};
pub use indexer::{
    progress_label, BatchAggregate, BuildIndexer, IndexReport, IndexRequest, Indexer, IndexerEnv,
    StepProgress, DEFAULT_BATCH_SIZE,
};
pub use manager::{
    temporary_index_name, IndexerManager, MetaSource, PublishReport, PublishRequest, PublishSteps,
};
pub use mapping::{build_mapping, default_index_settings, merge_properties, CATCH_ALL_FIELD};
pub use registry::{IndexerFactory, IndexerRegistry, COLD_HOT_KIND, DEFAULT_KIND};
pub use release::{ReleaseMetadata, VersionInfo, VersionList};
pub use source::{BuildSource, BuildTarget, ColdHotContext};
pub use status::{StatusTracker, StepHandle, StepOutcome};
pub use worker::BatchWorker;
