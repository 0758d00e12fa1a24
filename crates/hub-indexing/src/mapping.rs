//! Index mapping and creation settings.

use serde_json::{json, Value};

use hub_types::{BuildMeta, Document};

/// Catch-all field every document is copied into.
pub const CATCH_ALL_FIELD: &str = "all";

/// Settings every index is created with, before shard and replica counts.
///
/// Declares the analyzers and normalizer build mappings refer to for
/// case-insensitive keyword and whitespace matching.
pub fn default_index_settings() -> Value {
    json!({
        "query": { "default_field": CATCH_ALL_FIELD },
        "codec": "best_compression",
        "analysis": {
            "normalizer": {
                "keyword_lowercase_normalizer": {
                    "type": "custom",
                    "char_filter": [],
                    "filter": ["lowercase"]
                }
            },
            "analyzer": {
                "string_lowercase": {
                    "tokenizer": "keyword",
                    "filter": ["lowercase"]
                },
                "whitespace_lowercase": {
                    "tokenizer": "whitespace",
                    "filter": ["lowercase"]
                }
            }
        }
    })
}

/// Assemble the final mapping from a build's field properties and metadata.
///
/// Dynamic mapping is disabled so only declared fields are indexed.
pub fn build_mapping(properties: &Document, meta: &BuildMeta) -> Value {
    let mut props = properties.clone();
    props.insert(CATCH_ALL_FIELD.to_string(), json!({ "type": "text" }));
    json!({
        "properties": props,
        "dynamic": "false",
        "_meta": meta.to_value(),
    })
}

/// Overlay `hot` properties on `cold` ones. Same-named fields take the hot
/// definition.
pub fn merge_properties(cold: &Document, hot: &Document) -> Document {
    let mut merged = cold.clone();
    for (field, def) in hot {
        merged.insert(field.clone(), def.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn props(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_mapping_adds_catch_all_and_meta() {
        let meta = BuildMeta {
            build_version: Some("20240301".to_string()),
            ..BuildMeta::default()
        };
        let mapping = build_mapping(&props(json!({"symbol": {"type": "keyword"}})), &meta);

        assert_eq!(mapping["properties"]["all"], json!({"type": "text"}));
        assert_eq!(mapping["properties"]["symbol"], json!({"type": "keyword"}));
        assert_eq!(mapping["dynamic"], json!("false"));
        assert_eq!(mapping["_meta"]["build_version"], json!("20240301"));
    }

    #[test]
    fn test_hot_properties_win() {
        let cold = props(json!({
            "symbol": {"type": "keyword"},
            "cold_only": {"type": "integer"}
        }));
        let hot = props(json!({
            "symbol": {"type": "text"},
            "hot_only": {"type": "boolean"}
        }));
        let merged = merge_properties(&cold, &hot);

        assert_eq!(merged["symbol"], json!({"type": "text"}));
        assert_eq!(merged["cold_only"], json!({"type": "integer"}));
        assert_eq!(merged["hot_only"], json!({"type": "boolean"}));
    }

    #[test]
    fn test_default_settings_declare_analyzers() {
        let settings = default_index_settings();
        assert_eq!(settings["query"]["default_field"], json!("all"));
        assert!(settings["analysis"]["analyzer"]["string_lowercase"].is_object());
        assert!(settings["analysis"]["analyzer"]["whitespace_lowercase"].is_object());
        assert_eq!(
            settings["analysis"]["normalizer"]["keyword_lowercase_normalizer"]["filter"],
            json!(["lowercase"])
        );
    }
}
