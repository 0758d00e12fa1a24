//! # hub-search
//!
//! Search-engine clients for the index hub.
//!
//! ## Features
//! - `IndexClient`: operations on one physical index (create, bulk write,
//!   lookups, snapshots, mapping metadata)
//! - `EngineConnector`: builds an `IndexClient` from serializable
//!   `ClientParams`, so each batch worker connects its own client
//! - `EsConnector`: Elasticsearch REST client with retry/backoff
//! - `MemoryEngine`: in-process engine for tests and dry runs

pub mod client;
pub mod elastic;
pub mod error;
pub mod memory;

pub use client::{BulkOutcome, EngineConnector, IndexClient, SnapshotState};
pub use elastic::{EsClient, EsConnector};
pub use error::SearchError;
pub use memory::{MemoryEngine, MemoryIndexClient};
