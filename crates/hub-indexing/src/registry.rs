//! Indexer kind selection.
//!
//! Kinds are named constructors. Selection rules are evaluated in declared
//! order: the first rule whose dotted path exists in the build document
//! picks the kind. A rule without a path is the fallback; without one, the
//! plain indexer is used.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use hub_types::{BuildDocument, IndexerSelect};

use crate::coldhot::ColdHotIndexer;
use crate::error::IndexerError;
use crate::indexer::{BuildIndexer, Indexer};

pub const DEFAULT_KIND: &str = "default";
pub const COLD_HOT_KIND: &str = "cold_hot";

/// Builds an indexer kind around a configured plain indexer.
pub type IndexerFactory = Arc<dyn Fn(Indexer) -> Arc<dyn BuildIndexer> + Send + Sync>;

#[derive(Clone)]
pub struct IndexerRegistry {
    kinds: BTreeMap<String, IndexerFactory>,
    rules: Vec<(String, String)>,
    fallback: Option<String>,
}

impl Default for IndexerRegistry {
    fn default() -> Self {
        let mut registry = Self {
            kinds: BTreeMap::new(),
            rules: Vec::new(),
            fallback: None,
        };
        registry.register_kind(DEFAULT_KIND, Arc::new(|idx| Arc::new(idx) as Arc<dyn BuildIndexer>));
        registry.register_kind(
            COLD_HOT_KIND,
            Arc::new(|idx| Arc::new(ColdHotIndexer::new(idx)) as Arc<dyn BuildIndexer>),
        );
        registry
    }
}

impl IndexerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in kinds and the configured rules.
    pub fn from_selection(rules: &[IndexerSelect]) -> Result<Self, IndexerError> {
        let mut registry = Self::default();
        for rule in rules {
            registry.add_rule(rule.path.clone(), &rule.kind)?;
        }
        Ok(registry)
    }

    pub fn register_kind(&mut self, name: impl Into<String>, factory: IndexerFactory) {
        self.kinds.insert(name.into(), factory);
    }

    /// Append a selection rule. `None` sets the fallback kind.
    pub fn add_rule(&mut self, path: Option<String>, kind: &str) -> Result<(), IndexerError> {
        if !self.kinds.contains_key(kind) {
            return Err(IndexerError::Configuration(format!(
                "unknown indexer kind '{}'",
                kind
            )));
        }
        match path {
            Some(path) => self.rules.push((path, kind.to_string())),
            None => {
                if self.fallback.is_some() {
                    return Err(IndexerError::Configuration(
                        "only one indexer rule may omit its path".to_string(),
                    ));
                }
                self.fallback = Some(kind.to_string());
            }
        }
        Ok(())
    }

    pub fn kinds(&self) -> Vec<String> {
        self.kinds.keys().cloned().collect()
    }

    /// Kind name for a build, `default` when nothing matches or the build
    /// is unknown.
    pub fn resolve_kind(&self, build: Option<&BuildDocument>) -> &str {
        if let Some(doc) = build {
            for (path, kind) in &self.rules {
                if doc.dotted_value(path).is_some() {
                    debug!(build = %doc.id, path = %path, kind = %kind, "Indexer rule matched");
                    return kind;
                }
            }
            if let Some(kind) = &self.fallback {
                return kind;
            }
        }
        DEFAULT_KIND
    }

    /// Construct the indexer for a build.
    pub fn build(&self, build: Option<&BuildDocument>, base: Indexer) -> Result<Arc<dyn BuildIndexer>, IndexerError> {
        let kind = self.resolve_kind(build);
        let factory = self.kinds.get(kind).ok_or_else(|| {
            IndexerError::Configuration(format!("unknown indexer kind '{}'", kind))
        })?;
        Ok(factory(base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(value: serde_json::Value) -> BuildDocument {
        serde_json::from_value(value).unwrap()
    }

    fn rule(path: Option<&str>, kind: &str) -> IndexerSelect {
        IndexerSelect {
            path: path.map(str::to_string),
            kind: kind.to_string(),
        }
    }

    #[test]
    fn test_first_matching_path_wins() {
        let registry = IndexerRegistry::from_selection(&[
            rule(Some("build_config.cold_collection"), COLD_HOT_KIND),
            rule(Some("build_config.doc_type"), DEFAULT_KIND),
        ])
        .unwrap();

        let hot = build(json!({"_id": "h", "build_config": {"doc_type": "gene", "cold_collection": "c"}}));
        assert_eq!(registry.resolve_kind(Some(&hot)), COLD_HOT_KIND);

        let plain = build(json!({"_id": "p", "build_config": {"doc_type": "gene"}}));
        assert_eq!(registry.resolve_kind(Some(&plain)), DEFAULT_KIND);
    }

    #[test]
    fn test_fallback_applies_when_no_path_matches() {
        let registry = IndexerRegistry::from_selection(&[
            rule(Some("build_config.special"), DEFAULT_KIND),
            rule(None, COLD_HOT_KIND),
        ])
        .unwrap();
        let doc = build(json!({"_id": "x"}));
        assert_eq!(registry.resolve_kind(Some(&doc)), COLD_HOT_KIND);
        assert_eq!(registry.resolve_kind(None), DEFAULT_KIND);
    }

    #[test]
    fn test_no_rules_means_default() {
        let registry = IndexerRegistry::new();
        let doc = build(json!({"_id": "x", "build_config": {"cold_collection": "c"}}));
        assert_eq!(registry.resolve_kind(Some(&doc)), DEFAULT_KIND);
        assert_eq!(registry.kinds(), vec!["cold_hot".to_string(), "default".to_string()]);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(IndexerRegistry::from_selection(&[rule(Some("a"), "vector")]).is_err());
        assert!(IndexerRegistry::from_selection(&[rule(None, "default"), rule(None, "cold_hot")]).is_err());
    }
}
