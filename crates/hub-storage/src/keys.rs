//! Key encoding and decoding for collection documents.
//!
//! Key format: `{collection}:{id}`
//! - collection: the collection name, which may not contain `:`
//! - id: the document `_id`; non-string ids are stored by their JSON text
//!
//! Keys of one collection share a prefix and sort by id, which gives a
//! lexicographically stable paging order.

use serde_json::Value;

use crate::error::StorageError;

/// Key for a document in the documents column family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentKey {
    pub collection: String,
    pub id: String,
}

impl DocumentKey {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Result<Self, StorageError> {
        let collection = collection.into();
        validate_collection(&collection)?;
        Ok(Self {
            collection,
            id: id.into(),
        })
    }

    /// Build a key from a document's `_id` value.
    pub fn for_value(collection: &str, id: &Value) -> Result<Self, StorageError> {
        Self::new(collection, id_text(id))
    }

    /// Encode key to bytes for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}:{}", self.collection, self.id).into_bytes()
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let (collection, id) = s
            .split_once(':')
            .ok_or_else(|| StorageError::Key(format!("Invalid document key format: {}", s)))?;
        Ok(Self {
            collection: collection.to_string(),
            id: id.to_string(),
        })
    }

    /// Prefix shared by every key of `collection`
    pub fn prefix(collection: &str) -> Result<Vec<u8>, StorageError> {
        validate_collection(collection)?;
        Ok(format!("{}:", collection).into_bytes())
    }
}

/// Text form of an `_id` used in keys.
pub fn id_text(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn validate_collection(collection: &str) -> Result<(), StorageError> {
    if collection.is_empty() || collection.contains(':') {
        return Err(StorageError::Key(format!(
            "Invalid collection name: '{}'",
            collection
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_key_roundtrip_keeps_colons_in_id() {
        let key = DocumentKey::new("genes_build1", "chr1:12345").unwrap();
        let decoded = DocumentKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn test_collection_validation() {
        assert!(DocumentKey::new("bad:name", "1").is_err());
        assert!(DocumentKey::new("", "1").is_err());
        assert!(DocumentKey::prefix("a:b").is_err());
    }

    #[test]
    fn test_non_string_ids() {
        let key = DocumentKey::for_value("c", &json!(42)).unwrap();
        assert_eq!(key.id, "42");
    }

    #[test]
    fn test_prefix_is_collection_scoped() {
        let prefix = DocumentKey::prefix("genes").unwrap();
        let own = DocumentKey::new("genes", "g1").unwrap().to_bytes();
        let other = DocumentKey::new("genes_hot", "g1").unwrap().to_bytes();
        assert!(own.starts_with(&prefix));
        assert!(!other.starts_with(&prefix));
    }
}
