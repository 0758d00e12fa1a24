//! What an indexing run reads from: one build, or a cold/hot pair.

use hub_types::{merge_build_metadata, BuildDocument, BuildMeta, Document, IndexMode};

use crate::error::IndexerError;
use crate::mapping::merge_properties;

/// A hot build merged over the immutable cold build it references.
#[derive(Debug, Clone)]
pub struct ColdHotContext {
    pub cold: BuildDocument,
    pub hot: BuildDocument,
}

impl ColdHotContext {
    /// Field properties of both builds, hot definitions winning.
    pub fn properties(&self) -> Document {
        merge_properties(&self.cold.mapping, &self.hot.mapping)
    }

    /// Metadata of both builds, hot values winning.
    pub fn metadata(&self) -> BuildMeta {
        merge_build_metadata(&[&self.cold, &self.hot])
    }
}

#[derive(Debug, Clone)]
pub enum BuildSource {
    Single(BuildDocument),
    ColdHot(ColdHotContext),
}

/// One collection pass of the index step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPhase {
    pub collection: String,
    pub mode: IndexMode,
}

impl BuildSource {
    /// The addressable build: the single one, or the hot one.
    pub fn status_document(&self) -> &BuildDocument {
        match self {
            BuildSource::Single(doc) => doc,
            BuildSource::ColdHot(ctx) => &ctx.hot,
        }
    }

    pub fn name(&self) -> &str {
        &self.status_document().id
    }

    pub fn properties(&self) -> Document {
        match self {
            BuildSource::Single(doc) => doc.mapping.clone(),
            BuildSource::ColdHot(ctx) => ctx.properties(),
        }
    }

    pub fn metadata(&self) -> BuildMeta {
        match self {
            BuildSource::Single(doc) => doc.meta.clone(),
            BuildSource::ColdHot(ctx) => ctx.metadata(),
        }
    }

    /// Collections to index, in order. The hot pass always merges.
    pub fn phases(&self, mode: IndexMode) -> Vec<IndexPhase> {
        match self {
            BuildSource::Single(doc) => vec![IndexPhase {
                collection: doc.id.clone(),
                mode,
            }],
            BuildSource::ColdHot(ctx) => vec![
                IndexPhase {
                    collection: ctx.cold.id.clone(),
                    mode,
                },
                IndexPhase {
                    collection: ctx.hot.id.clone(),
                    mode: IndexMode::Merge,
                },
            ],
        }
    }
}

/// Index parameters derived from a build document.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildTarget {
    pub doc_type: String,
    pub num_shards: u32,
    pub num_replicas: u32,
    pub conf_name: String,
}

impl BuildTarget {
    /// # Errors
    ///
    /// `IndexerError::Configuration` when the build has no `build_config`
    /// or no doc type.
    pub fn resolve(doc: &BuildDocument) -> Result<Self, IndexerError> {
        let config = doc.build_config.as_ref().ok_or_else(|| {
            IndexerError::Configuration(format!("build '{}' has no build_config", doc.id))
        })?;
        let doc_type = config
            .doc_type
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                IndexerError::Configuration(format!("build '{}' has no doc_type", doc.id))
            })?;
        Ok(Self {
            doc_type,
            num_shards: config.shards(),
            num_replicas: config.replicas(),
            conf_name: config.name.clone().unwrap_or_else(|| doc.id.clone()),
        })
    }
}
