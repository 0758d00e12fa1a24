//! Index modes, steps and the serializable batch unit dispatched to workers.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HubError;

/// How an indexing run treats an existing index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    /// Create a new index; fails if it already exists
    #[default]
    Create,
    /// Delete an existing index first
    Purge,
    /// Reuse an existing index and only add missing documents
    Resume,
    /// Merge documents into those already indexed
    Merge,
}

impl IndexMode {
    /// Whether an existing index may be reused as-is.
    pub fn reuses_index(&self) -> bool {
        matches!(self, IndexMode::Resume | IndexMode::Merge)
    }
}

impl std::fmt::Display for IndexMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexMode::Create => write!(f, "create"),
            IndexMode::Purge => write!(f, "purge"),
            IndexMode::Resume => write!(f, "resume"),
            IndexMode::Merge => write!(f, "merge"),
        }
    }
}

impl FromStr for IndexMode {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "create" | "index" => Ok(IndexMode::Create),
            "purge" => Ok(IndexMode::Purge),
            "resume" => Ok(IndexMode::Resume),
            "merge" => Ok(IndexMode::Merge),
            other => Err(HubError::InvalidInput(format!("unknown index mode: {}", other))),
        }
    }
}

/// Which phases of an indexing run to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSteps {
    pub index: bool,
    pub post: bool,
}

impl Default for IndexSteps {
    fn default() -> Self {
        Self::all()
    }
}

impl IndexSteps {
    pub fn all() -> Self {
        Self {
            index: true,
            post: true,
        }
    }

    pub fn index_only() -> Self {
        Self {
            index: true,
            post: false,
        }
    }

    pub fn post_only() -> Self {
        Self {
            index: false,
            post: true,
        }
    }
}

impl FromStr for IndexSteps {
    type Err = HubError;

    /// Parse a comma separated list such as `index,post`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut steps = IndexSteps {
            index: false,
            post: false,
        };
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part {
                "index" => steps.index = true,
                "post" => steps.post = true,
                other => {
                    return Err(HubError::InvalidInput(format!("unknown step: {}", other)))
                }
            }
        }
        if !steps.index && !steps.post {
            return Err(HubError::InvalidInput("no step given".to_string()));
        }
        Ok(steps)
    }
}

/// Which batch strategy writes documents into the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// Overwrite documents with the source version
    Fresh,
    /// Merge source fields into already indexed documents
    Merge,
}

impl WorkerKind {
    /// The strategy is picked once per run from the mode.
    pub fn for_mode(mode: IndexMode) -> Self {
        match mode {
            IndexMode::Merge => WorkerKind::Merge,
            _ => WorkerKind::Fresh,
        }
    }
}

/// Everything a worker needs to connect its own engine client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientParams {
    pub host: String,
    pub index_name: String,
    pub doc_type: String,
    pub num_shards: u32,
    pub num_replicas: u32,

    /// Documents per `_bulk` request
    #[serde(default = "default_bulk_chunk_size")]
    pub bulk_chunk_size: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_bulk_chunk_size() -> usize {
    500
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

impl ClientParams {
    pub fn new(
        host: impl Into<String>,
        index_name: impl Into<String>,
        doc_type: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            index_name: index_name.into(),
            doc_type: doc_type.into(),
            num_shards: crate::build::DEFAULT_NUM_SHARDS,
            num_replicas: crate::build::DEFAULT_NUM_REPLICAS,
            bulk_chunk_size: default_bulk_chunk_size(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }

    pub fn with_shards(mut self, shards: u32, replicas: u32) -> Self {
        self.num_shards = shards;
        self.num_replicas = replicas;
        self
    }

    pub fn with_bulk_chunk_size(mut self, size: usize) -> Self {
        self.bulk_chunk_size = size.max(1);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn descriptor(&self) -> IndexDescriptor {
        IndexDescriptor {
            host: self.host.clone(),
            index_name: self.index_name.clone(),
            doc_type: self.doc_type.clone(),
        }
    }
}

/// Identifies one physical index. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub host: String,
    pub index_name: String,
    pub doc_type: String,
}

impl std::fmt::Display for IndexDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} ({})", self.host, self.index_name, self.doc_type)
    }
}

/// One batch of document IDs to write into an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTask {
    pub collection: String,
    pub ids: Vec<String>,
    pub params: ClientParams,
    /// 1-based sequence number
    pub batch_num: usize,
    pub mode: IndexMode,
    pub worker: WorkerKind,
}

impl BatchTask {
    pub fn new(
        collection: impl Into<String>,
        ids: Vec<String>,
        params: ClientParams,
        batch_num: usize,
        mode: IndexMode,
    ) -> Self {
        Self {
            collection: collection.into(),
            ids,
            params,
            batch_num,
            mode,
            worker: WorkerKind::for_mode(mode),
        }
    }

    pub fn with_worker(mut self, worker: WorkerKind) -> Self {
        self.worker = worker;
        self
    }

    /// Stem used for the batch log and failure dump.
    pub fn log_name(&self) -> String {
        format!(
            "index_{}_{}_batch_{}",
            self.params.index_name, self.collection, self.batch_num
        )
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
