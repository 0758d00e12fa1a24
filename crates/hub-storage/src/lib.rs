//! Storage layer for the index hub.
//!
//! Provides:
//! - The `DocumentStore` and `BuildStore` traits consumed by the indexer
//! - RocksDB-backed `Storage` with one column family per data kind
//! - `MemoryStore`, an in-process implementation of both traits
//! - The `ObjectStore` trait and a folder-backed `LocalObjectStore`

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod memory;
pub mod object_store;
pub mod traits;

pub use db::Storage;
pub use error::StorageError;
pub use keys::DocumentKey;
pub use memory::MemoryStore;
pub use object_store::{LocalObjectStore, ObjectMetadata, ObjectStore};
pub use traits::{BuildStore, DocumentStore, IdPage};
