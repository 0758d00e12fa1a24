//! Configuration loading for the index hub.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/index-hub/config.toml.

use std::collections::BTreeMap;
use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};

use crate::error::HubError;

/// Indexer arguments attached to one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerArgs {
    /// Engine request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries for failed engine requests
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Documents per `_bulk` request
    #[serde(default = "default_bulk_chunk_size")]
    pub bulk_chunk_size: usize,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_bulk_chunk_size() -> usize {
    500
}

impl Default for IndexerArgs {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            bulk_chunk_size: default_bulk_chunk_size(),
        }
    }
}

/// A named indexing environment: an engine host plus indexer arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvConfig {
    pub host: String,

    #[serde(default)]
    pub indexer: IndexerArgs,
}

impl EnvConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            indexer: IndexerArgs::default(),
        }
    }
}

/// One indexer selection rule. A rule without a path is the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerSelect {
    #[serde(default)]
    pub path: Option<String>,
    pub kind: String,
}

/// Version stamps written into published release metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionStamps {
    #[serde(default = "default_version_stamp")]
    pub app: String,

    #[serde(default = "default_version_stamp")]
    pub hub: String,

    #[serde(default)]
    pub standalone: Option<String>,
}

fn default_version_stamp() -> String {
    "master".to_string()
}

impl Default for VersionStamps {
    fn default() -> Self {
        Self {
            app: default_version_stamp(),
            hub: default_version_stamp(),
            standalone: None,
        }
    }
}

/// Where release artifacts are uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectStoreSettings {
    /// Local directory backing the bucket
    #[serde(default = "default_object_store_root")]
    pub root: String,

    /// Public URL prefix used when building object URLs
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for ObjectStoreSettings {
    fn default() -> Self {
        Self {
            root: default_object_store_root(),
            base_url: None,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to RocksDB storage directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Folder for per-batch failure dumps
    #[serde(default = "default_log_folder")]
    pub log_folder: String,

    /// Folder where release metadata files are written before upload
    #[serde(default = "default_diff_path")]
    pub diff_path: String,

    /// Root of per-release folders holding release notes
    #[serde(default = "default_release_path")]
    pub release_path: String,

    /// Hub role; only a `master` hub publishes releases
    #[serde(default = "default_hub_role")]
    pub hub_role: String,

    #[serde(default = "default_snapshot_repository")]
    pub snapshot_repository: String,

    /// Delay between two snapshot status checks
    #[serde(default = "default_monitor_snapshot_delay_secs")]
    pub monitor_snapshot_delay_secs: u64,

    /// Maximum number of batches indexed concurrently
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,

    #[serde(default)]
    pub versions: VersionStamps,

    /// Publish even when version stamps are placeholders
    #[serde(default)]
    pub skip_check_versions: bool,

    #[serde(default)]
    pub object_store: ObjectStoreSettings,

    /// Named indexing environments
    #[serde(default)]
    pub env: BTreeMap<String, EnvConfig>,

    /// Ordered indexer selection rules, first match wins
    #[serde(default)]
    pub indexer_select: Vec<IndexerSelect>,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "index-hub")
}

fn data_subdir(name: &str) -> String {
    project_dirs()
        .map(|p| p.data_local_dir().join(name))
        .unwrap_or_else(|| PathBuf::from(format!("./{}", name)))
        .to_string_lossy()
        .to_string()
}

fn default_db_path() -> String {
    data_subdir("db")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_folder() -> String {
    data_subdir("logs")
}

fn default_diff_path() -> String {
    data_subdir("diff")
}

fn default_release_path() -> String {
    data_subdir("release")
}

fn default_object_store_root() -> String {
    data_subdir("bucket")
}

fn default_hub_role() -> String {
    "master".to_string()
}

fn default_snapshot_repository() -> String {
    "hub_repository".to_string()
}

fn default_monitor_snapshot_delay_secs() -> u64 {
    60
}

fn default_max_workers() -> usize {
    4
}

fn default_batch_size() -> usize {
    10_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            log_folder: default_log_folder(),
            diff_path: default_diff_path(),
            release_path: default_release_path(),
            hub_role: default_hub_role(),
            snapshot_repository: default_snapshot_repository(),
            monitor_snapshot_delay_secs: default_monitor_snapshot_delay_secs(),
            max_workers: default_max_workers(),
            default_batch_size: default_batch_size(),
            versions: VersionStamps::default(),
            skip_check_versions: false,
            object_store: ObjectStoreSettings::default(),
            env: BTreeMap::new(),
            indexer_select: Vec::new(),
        }
    }
}

fn config_err(e: config::ConfigError) -> HubError {
    HubError::Config(e.to_string())
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/index-hub/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (HUB_*, nested keys joined with `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, HubError> {
        let config_dir = project_dirs()
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(config_err)?
            .set_default("log_level", default_log_level())
            .map_err(config_err)?
            .set_default("log_folder", default_log_folder())
            .map_err(config_err)?
            .set_default("diff_path", default_diff_path())
            .map_err(config_err)?
            .set_default("release_path", default_release_path())
            .map_err(config_err)?
            .set_default("hub_role", default_hub_role())
            .map_err(config_err)?
            .set_default("snapshot_repository", default_snapshot_repository())
            .map_err(config_err)?
            .set_default(
                "monitor_snapshot_delay_secs",
                default_monitor_snapshot_delay_secs() as i64,
            )
            .map_err(config_err)?
            .set_default("max_workers", default_max_workers() as i64)
            .map_err(config_err)?
            .set_default("default_batch_size", default_batch_size() as i64)
            .map_err(config_err)?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // HUB_LOG_LEVEL, HUB_ENV__PROD__HOST, HUB_VERSIONS__APP, ...
        builder = builder.add_source(
            Environment::with_prefix("HUB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().map_err(config_err)?;
        let settings: Settings = config.try_deserialize().map_err(config_err)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), HubError> {
        if self.max_workers == 0 {
            return Err(HubError::Config("max_workers must be > 0".to_string()));
        }
        if self.default_batch_size == 0 {
            return Err(HubError::Config(
                "default_batch_size must be > 0".to_string(),
            ));
        }
        if self.indexer_select.iter().filter(|s| s.path.is_none()).count() > 1 {
            return Err(HubError::Config(
                "indexer_select declares more than one default".to_string(),
            ));
        }
        Ok(())
    }

    /// Look up a named environment.
    pub fn environment(&self, name: &str) -> Result<&EnvConfig, HubError> {
        self.env
            .get(name)
            .ok_or_else(|| HubError::NotFound(format!("environment '{}'", name)))
    }

    /// Expand ~ in db_path to actual home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }

    pub fn expanded_log_folder(&self) -> PathBuf {
        expand_home(&self.log_folder)
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(base) = BaseDirs::new() {
            return base.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.hub_role, "master");
        assert_eq!(settings.default_batch_size, 10_000);
        assert_eq!(settings.monitor_snapshot_delay_secs, 60);
        assert_eq!(settings.versions.app, "master");
        assert!(settings.versions.standalone.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hub.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
max_workers = 8
snapshot_repository = "s3_repo"

[versions]
app = "1.2.0"
hub = "0.9.1"
standalone = "0.4"

[env.prod]
host = "http://es-prod:9200"

[env.prod.indexer]
bulk_chunk_size = 1000

[[indexer_select]]
path = "build_config.cold_collection"
kind = "cold_hot"

[[indexer_select]]
kind = "default"
"#
        )
        .unwrap();

        let settings = Settings::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(settings.max_workers, 8);
        assert_eq!(settings.snapshot_repository, "s3_repo");
        assert_eq!(settings.versions.standalone.as_deref(), Some("0.4"));

        let prod = settings.environment("prod").unwrap();
        assert_eq!(prod.host, "http://es-prod:9200");
        assert_eq!(prod.indexer.bulk_chunk_size, 1000);
        assert_eq!(prod.indexer.max_retries, 3);

        assert_eq!(settings.indexer_select.len(), 2);
        assert_eq!(
            settings.indexer_select[0].path.as_deref(),
            Some("build_config.cold_collection")
        );
        assert!(settings.indexer_select[1].path.is_none());
    }

    #[test]
    fn test_unknown_environment() {
        let settings = Settings::default();
        assert!(matches!(
            settings.environment("nope"),
            Err(HubError::NotFound(_))
        ));
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings {
            max_workers: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        settings.max_workers = 2;
        settings.indexer_select = vec![
            IndexerSelect {
                path: None,
                kind: "default".into(),
            },
            IndexerSelect {
                path: None,
                kind: "cold_hot".into(),
            },
        ];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/var/hub"), PathBuf::from("/var/hub"));
        let expanded = expand_home("~/hub/db");
        assert!(expanded.ends_with("hub/db"));
    }
}
