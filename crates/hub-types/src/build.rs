//! Build documents and the job log they carry.
//!
//! A build document describes one named collection-build: its configuration,
//! the mapping fragment computed while merging sources, release metadata and
//! an append-only list of [`JobRecord`]s. Unknown fields are kept in `extra`
//! so dotted-path lookups see the full stored document.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A raw JSON document as stored in a collection or in the search engine.
pub type Document = Map<String, Value>;

/// Default number of primary shards when the build config omits it.
pub const DEFAULT_NUM_SHARDS: u32 = 10;

/// Default number of replicas when the build config omits it.
pub const DEFAULT_NUM_REPLICAS: u32 = 0;

/// Status of one indexing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Indexing,
    Success,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Indexing => write!(f, "indexing"),
            JobStatus::Success => write!(f, "success"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Build configuration section (`build_config`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Configuration name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Document type used for the index mapping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub num_shards: Option<u32>,

    #[serde(
        default,
        deserialize_with = "lenient_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub num_replicas: Option<u32>,

    /// Name of the immutable collection merged under this one (cold/hot builds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cold_collection: Option<String>,

    #[serde(flatten)]
    pub extra: Document,
}

impl BuildConfig {
    pub fn shards(&self) -> u32 {
        self.num_shards.unwrap_or(DEFAULT_NUM_SHARDS)
    }

    pub fn replicas(&self) -> u32 {
        self.num_replicas.unwrap_or(DEFAULT_NUM_REPLICAS)
    }
}

/// Shard and replica counts are sometimes stored as strings.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid count: {}", n))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid count: {:?}", s))),
        Some(other) => Err(serde::de::Error::custom(format!(
            "invalid count: {}",
            other
        ))),
    }
}

/// Release metadata stored under `_meta`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildMeta {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub src_version: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stats: BTreeMap<String, Value>,

    /// ISO-8601 build timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_version: Option<String>,

    #[serde(flatten)]
    pub extra: Document,
}

impl BuildMeta {
    /// Render as a JSON object, suitable for a mapping `_meta`.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Parse the build date, accepting RFC 3339 or a naive `YYYY-MM-DDTHH:MM:SS[.f]`.
    pub fn parsed_build_date(&self) -> Option<DateTime<Utc>> {
        let raw = self.build_date.as_deref()?;
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// Description of one physical index as recorded on a build document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_shards: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_replicas: Option<u32>,

    /// Number of documents written, set once indexing succeeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Document,
}

impl IndexInfo {
    /// Merge `other` into `self`; fields set on `other` win.
    pub fn merge_from(&mut self, other: &IndexInfo) {
        fn take<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                slot.clone_from(value);
            }
        }
        take(&mut self.host, &other.host);
        take(&mut self.environment, &other.environment);
        take(&mut self.conf_name, &other.conf_name);
        take(&mut self.target_name, &other.target_name);
        take(&mut self.index_name, &other.index_name);
        take(&mut self.doc_type, &other.doc_type);
        take(&mut self.num_shards, &other.num_shards);
        take(&mut self.num_replicas, &other.num_replicas);
        take(&mut self.count, &other.count);
        take(&mut self.created_at, &other.created_at);
        for (k, v) in &other.extra {
            self.extra.insert(k.clone(), v.clone());
        }
    }
}

/// One entry of a build document's job log.
///
/// A record is either transient (carries a `pid`, no timing) or finalized
/// (carries `time`/`time_in_s`, no `pid`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub status: JobStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,

    pub step_started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logfile: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Human readable elapsed time, e.g. `1m2.5s`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_in_s: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexInfo>,
}

impl JobRecord {
    /// Start a new in-progress record for `step`.
    pub fn transient(step: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Indexing,
            step: Some(step.into()),
            step_started_at: Utc::now(),
            logfile: None,
            pid: Some(std::process::id()),
            time: None,
            time_in_s: None,
            err: None,
            index: None,
        }
    }

    pub fn with_logfile(mut self, logfile: impl Into<String>) -> Self {
        self.logfile = Some(logfile.into());
        self
    }

    pub fn is_transient(&self) -> bool {
        self.time.is_none()
    }

    /// Move the record to a terminal state. Clears the pid.
    pub fn finalize(&mut self, status: JobStatus, elapsed: Duration) {
        self.status = status;
        self.pid = None;
        self.time = Some(format_elapsed(elapsed));
        self.time_in_s = Some(elapsed.as_secs_f64().round());
    }
}

/// Format a duration as `[Nh][Nm]S.SSs`.
pub fn format_elapsed(elapsed: Duration) -> String {
    // round to hundredths before splitting so 119.996s reads 2m0s
    let centis = (elapsed.as_secs_f64() * 100.0).round() as u64;
    let hours = centis / 360_000;
    let minutes = (centis % 360_000) / 6_000;
    let seconds = (centis % 6_000) as f64 / 100.0;
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    out.push_str(&format!("{}s", seconds));
    out
}

/// A build-tracking document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildDocument {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_config: Option<BuildConfig>,

    /// Field mapping fragment computed at build time
    #[serde(default)]
    pub mapping: Document,

    #[serde(rename = "_meta", default)]
    pub meta: BuildMeta,

    #[serde(default)]
    pub jobs: Vec<JobRecord>,

    /// Per-index information, keyed by index name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub index: BTreeMap<String, IndexInfo>,

    #[serde(flatten)]
    pub extra: Document,
}

impl BuildDocument {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            build_config: None,
            mapping: Document::new(),
            meta: BuildMeta::default(),
            jobs: Vec::new(),
            index: BTreeMap::new(),
            extra: Document::new(),
        }
    }

    pub fn with_config(mut self, config: BuildConfig) -> Self {
        self.build_config = Some(config);
        self
    }

    pub fn with_mapping(mut self, mapping: Document) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn with_meta(mut self, meta: BuildMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Look up a dotted path (`build_config.cold_collection`) in the document.
    ///
    /// Returns `None` when any segment is missing. A present `null` is
    /// returned as `Some(Value::Null)`.
    pub fn dotted_value(&self, path: &str) -> Option<Value> {
        let root = serde_json::to_value(self).ok()?;
        let mut current = &root;
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }

    pub fn last_job(&self) -> Option<&JobRecord> {
        self.jobs.last()
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

/// Combine the metadata of several builds. Later documents win on collisions;
/// `src_version` and `stats` maps are unioned.
pub fn merge_build_metadata(docs: &[&BuildDocument]) -> BuildMeta {
    let mut merged = BuildMeta::default();
    for doc in docs {
        let meta = &doc.meta;
        merged
            .src_version
            .extend(meta.src_version.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
            .stats
            .extend(meta.stats.iter().map(|(k, v)| (k.clone(), v.clone())));
        if meta.build_date.is_some() {
            merged.build_date.clone_from(&meta.build_date);
        }
        if meta.build_version.is_some() {
            merged.build_version.clone_from(&meta.build_version);
        }
        for (k, v) in &meta.extra {
            merged.extra.insert(k.clone(), v.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn genes_build() -> BuildDocument {
        serde_json::from_value(json!({
            "_id": "genes_build1",
            "build_config": {
                "name": "genes",
                "doc_type": "gene",
                "num_shards": "4",
                "owner": "hub"
            },
            "mapping": {"symbol": {"type": "keyword"}},
            "_meta": {
                "src_version": {"ensembl": "101"},
                "stats": {"total": 25000},
                "build_date": "2024-03-01T10:00:00",
                "build_version": "20240301"
            },
            "target_backend": "rocksdb"
        }))
        .unwrap()
    }

    #[test]
    fn test_lenient_shard_count() {
        let doc = genes_build();
        let cfg = doc.build_config.unwrap();
        assert_eq!(cfg.num_shards, Some(4));
        assert_eq!(cfg.shards(), 4);
        assert_eq!(cfg.replicas(), DEFAULT_NUM_REPLICAS);
        assert_eq!(cfg.extra.get("owner"), Some(&json!("hub")));
    }

    #[test]
    fn test_invalid_shard_count_rejected() {
        let res: Result<BuildConfig, _> =
            serde_json::from_value(json!({"doc_type": "gene", "num_shards": "many"}));
        assert!(res.is_err());
    }

    #[test]
    fn test_unknown_fields_preserved() {
        let doc = genes_build();
        let bytes = doc.to_bytes().unwrap();
        let decoded = BuildDocument::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.extra.get("target_backend"), Some(&json!("rocksdb")));
        assert_eq!(decoded, doc);
    }

    #[test]
    fn test_dotted_value() {
        let doc = genes_build();
        assert_eq!(
            doc.dotted_value("build_config.doc_type"),
            Some(json!("gene"))
        );
        assert_eq!(doc.dotted_value("target_backend"), Some(json!("rocksdb")));
        assert_eq!(doc.dotted_value("build_config.cold_collection"), None);
        assert_eq!(doc.dotted_value("nope.deeper"), None);
    }

    #[test]
    fn test_job_record_lifecycle() {
        let mut job = JobRecord::transient("index");
        assert!(job.is_transient());
        assert_eq!(job.pid, Some(std::process::id()));

        job.finalize(JobStatus::Success, Duration::from_secs(75));
        assert!(!job.is_transient());
        assert_eq!(job.pid, None);
        assert_eq!(job.time.as_deref(), Some("1m15s"));
        assert_eq!(job.time_in_s, Some(75.0));
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_elapsed(Duration::from_secs(3725)), "1h2m5s");
        assert_eq!(format_elapsed(Duration::from_millis(119_600)), "1m59.6s");
        assert_eq!(format_elapsed(Duration::from_millis(119_996)), "2m0s");
        assert_eq!(format_elapsed(Duration::from_millis(3_599_999)), "1h0s");
    }

    #[test]
    fn test_index_info_merge() {
        let mut base = IndexInfo {
            host: Some("localhost:9200".into()),
            index_name: Some("genes".into()),
            ..Default::default()
        };
        let update = IndexInfo {
            count: Some(42),
            ..Default::default()
        };
        base.merge_from(&update);
        assert_eq!(base.host.as_deref(), Some("localhost:9200"));
        assert_eq!(base.count, Some(42));
    }

    #[test]
    fn test_merge_build_metadata_later_wins() {
        let cold = genes_build();
        let mut hot = BuildDocument::new("genes_hot");
        hot.meta.src_version.insert("ensembl".into(), json!("102"));
        hot.meta.src_version.insert("clinvar".into(), json!("2024-03"));
        hot.meta.build_version = Some("20240315".into());

        let merged = merge_build_metadata(&[&cold, &hot]);
        assert_eq!(merged.src_version.get("ensembl"), Some(&json!("102")));
        assert_eq!(merged.src_version.get("clinvar"), Some(&json!("2024-03")));
        assert_eq!(merged.stats.get("total"), Some(&json!(25000)));
        assert_eq!(merged.build_version.as_deref(), Some("20240315"));
        // hot has no build date, cold's survives
        assert_eq!(merged.build_date.as_deref(), Some("2024-03-01T10:00:00"));
    }

    #[test]
    fn test_parsed_build_date() {
        let doc = genes_build();
        let dt = doc.meta.parsed_build_date().unwrap();
        assert_eq!(dt.timestamp(), 1709287200);
    }
}
