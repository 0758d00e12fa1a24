//! Cold/hot indexing.
//!
//! A hot build references an immutable cold build through
//! `build_config.cold_collection`. The cold collection is indexed first with
//! the caller's mode, then the hot collection is merged on top. Status and
//! the post step only ever apply to the hot build.

use async_trait::async_trait;
use tracing::info;

use crate::error::IndexerError;
use crate::indexer::{BuildIndexer, IndexReport, IndexRequest, Indexer};
use crate::source::{BuildSource, ColdHotContext};

#[derive(Clone)]
pub struct ColdHotIndexer {
    inner: Indexer,
}

impl ColdHotIndexer {
    pub fn new(inner: Indexer) -> Self {
        Self { inner }
    }

    /// Load the hot build and the cold build it points to.
    pub async fn resolve(&self, hot_name: &str) -> Result<ColdHotContext, IndexerError> {
        let hot = self.inner.load_build(hot_name).await?;
        let cold_name = hot
            .build_config
            .as_ref()
            .and_then(|c| c.cold_collection.clone())
            .ok_or_else(|| {
                IndexerError::Configuration(format!(
                    "build '{}' does not reference a cold collection",
                    hot_name
                ))
            })?;
        let cold = self.inner.load_build(&cold_name).await?;
        Ok(ColdHotContext { cold, hot })
    }
}

#[async_trait]
impl BuildIndexer for ColdHotIndexer {
    fn kind(&self) -> &'static str {
        "cold_hot"
    }

    async fn index(&self, request: IndexRequest) -> Result<IndexReport, IndexerError> {
        let ctx = self.resolve(&request.collection).await?;
        info!(
            hot = %ctx.hot.id,
            cold = %ctx.cold.id,
            index = %request.target_index(),
            "Cold/hot indexing"
        );
        self.inner.run(BuildSource::ColdHot(ctx), request).await
    }
}
