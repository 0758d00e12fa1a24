//! Document ID filtering applied before a batch is dispatched.

use std::collections::HashSet;

use serde_json::Value;

/// Longest identifier the search engine accepts, in bytes.
pub const MAX_ID_BYTES: usize = 512;

/// Why an ID was dropped from a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectedId {
    NotAString(Value),
    Empty,
    TooLong(String),
}

impl std::fmt::Display for RejectedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectedId::NotAString(v) => write!(f, "_id {} has invalid type (not a string)", v),
            RejectedId::Empty => write!(f, "_id is empty"),
            RejectedId::TooLong(id) => {
                write!(f, "_id is too long ({} bytes): '{}'", id.len(), id)
            }
        }
    }
}

/// Result of [`clean_ids`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanedIds {
    /// Valid, deduplicated IDs in first-seen order
    pub ids: Vec<String>,
    pub rejected: Vec<RejectedId>,
    /// Number of valid IDs dropped as duplicates
    pub duplicates: usize,
}

impl CleanedIds {
    pub fn dropped(&self) -> usize {
        self.rejected.len() + self.duplicates
    }
}

/// Keep string IDs that are non-empty and at most [`MAX_ID_BYTES`] long.
pub fn clean_ids(raw: Vec<Value>) -> CleanedIds {
    let mut seen = HashSet::with_capacity(raw.len());
    let mut cleaned = CleanedIds::default();
    for value in raw {
        let id = match value {
            Value::String(s) => s,
            other => {
                cleaned.rejected.push(RejectedId::NotAString(other));
                continue;
            }
        };
        if id.is_empty() {
            cleaned.rejected.push(RejectedId::Empty);
        } else if id.len() > MAX_ID_BYTES {
            cleaned.rejected.push(RejectedId::TooLong(id));
        } else if seen.insert(id.clone()) {
            cleaned.ids.push(id);
        } else {
            cleaned.duplicates += 1;
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_ids_filters_invalid() {
        let long = "x".repeat(MAX_ID_BYTES + 1);
        let edge = "y".repeat(MAX_ID_BYTES);
        let raw = vec![
            json!("g1"),
            json!(42),
            json!(""),
            json!(long.clone()),
            json!(edge.clone()),
            json!(null),
        ];
        let cleaned = clean_ids(raw);
        assert_eq!(cleaned.ids, vec!["g1".to_string(), edge]);
        assert_eq!(cleaned.rejected.len(), 4);
        assert_eq!(cleaned.rejected[0], RejectedId::NotAString(json!(42)));
        assert_eq!(cleaned.rejected[2], RejectedId::TooLong(long));
    }

    #[test]
    fn test_clean_ids_dedups_in_order() {
        let cleaned = clean_ids(vec![json!("b"), json!("a"), json!("b")]);
        assert_eq!(cleaned.ids, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(cleaned.duplicates, 1);
        assert_eq!(cleaned.dropped(), 1);
    }

    #[test]
    fn test_multibyte_length_counts_bytes() {
        // 103 chars, 515 bytes
        let id = "é€".repeat(103);
        assert!(id.len() > MAX_ID_BYTES);
        let cleaned = clean_ids(vec![json!(id)]);
        assert!(cleaned.ids.is_empty());
    }
}
