//! Overridable indexer behaviour.

use std::path::PathBuf;

use serde_json::Value;

use hub_types::{ClientParams, IndexMode};

use crate::error::IndexerError;
use crate::mapping::default_index_settings;

/// Parameters handed to [`IndexerHooks::post_index`].
#[derive(Debug, Clone)]
pub struct PostIndexArgs {
    pub collection: String,
    pub index_name: String,
    pub mode: IndexMode,
    pub batch_size: usize,
    pub ids: Option<Vec<String>>,
    pub params: ClientParams,
}

/// Customization points of an indexing run.
///
/// `post_index` runs on a dedicated thread of the same process, so an
/// implementation may keep in-memory state behind interior mutability.
pub trait IndexerHooks: Send + Sync + 'static {
    /// Settings merged over shard/replica counts when the index is created.
    fn index_creation_settings(&self) -> Value {
        default_index_settings()
    }

    /// Last chance to alter the mapping before index creation.
    fn enrich_final_mapping(&self, mapping: Value) -> Value {
        mapping
    }

    fn post_index(&self, _args: &PostIndexArgs) -> Result<(), IndexerError> {
        Ok(())
    }
}

/// No customization.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl IndexerHooks for DefaultHooks {}

/// Parameters handed to [`PublishHooks::post_publish`].
#[derive(Debug, Clone)]
pub struct PostPublishArgs {
    pub env: String,
    pub folder: String,
    pub prev: Option<String>,
    pub snapshot: String,
    pub release_folder: Option<PathBuf>,
    pub index: String,
    pub repository: String,
}

/// Customization point run after release metadata is published, typically
/// to upload the rest of the release folder. Runs on a dedicated thread.
pub trait PublishHooks: Send + Sync + 'static {
    fn post_publish(&self, _args: &PostPublishArgs) -> Result<(), IndexerError> {
        Ok(())
    }
}

impl PublishHooks for DefaultHooks {}
