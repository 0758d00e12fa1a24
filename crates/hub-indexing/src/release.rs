//! Release metadata for published snapshots.
//!
//! A full release is described by `{folder}/{version}.json` and registered
//! in `{folder}/versions.json`, with `{folder}/latest.json` pointing at the
//! newest entry.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use hub_storage::{ObjectMetadata, ObjectStore};
use hub_types::VersionStamps;

use crate::error::IndexerError;

pub const RELEASE_TYPE_FULL: &str = "full";
const VERSIONS_KEY: &str = "versions.json";
const LATEST_KEY: &str = "latest.json";

/// Where the snapshot of a release lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotLocation {
    /// Repository settings as registered in the engine
    pub repository: Value,
    pub snapshot_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLink {
    pub url: String,
}

/// Links to uploaded release notes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txt: Option<ChangeLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<ChangeLink>,
}

impl ReleaseChanges {
    pub fn is_empty(&self) -> bool {
        self.txt.is_none() && self.json.is_none()
    }
}

/// Contents of `{version}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    #[serde(rename = "type")]
    pub release_type: String,
    pub build_version: String,
    pub target_version: String,
    pub release_date: DateTime<Utc>,
    pub app_version: String,
    /// Published under the key release consumers already read
    #[serde(rename = "biothings_version")]
    pub hub_version: String,
    pub standalone_version: Option<String>,
    pub metadata: SnapshotLocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<ReleaseChanges>,
}

impl ReleaseMetadata {
    pub fn full(
        build_version: impl Into<String>,
        versions: &VersionStamps,
        metadata: SnapshotLocation,
    ) -> Self {
        let build_version = build_version.into();
        Self {
            release_type: RELEASE_TYPE_FULL.to_string(),
            target_version: build_version.clone(),
            build_version,
            release_date: Utc::now(),
            app_version: versions.app.clone(),
            hub_version: versions.hub.clone(),
            standalone_version: versions.standalone.clone(),
            metadata,
            changes: None,
        }
    }

    pub fn with_changes(mut self, changes: ReleaseChanges) -> Self {
        self.changes = (!changes.is_empty()).then_some(changes);
        self
    }

    /// Entry registered in `versions.json`.
    pub fn version_info(&self, url: impl Into<String>) -> VersionInfo {
        VersionInfo {
            build_version: self.build_version.clone(),
            require_version: None,
            target_version: self.target_version.clone(),
            release_type: self.release_type.clone(),
            release_date: self.release_date,
            url: url.into(),
        }
    }
}

/// One published version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub build_version: String,
    pub require_version: Option<String>,
    pub target_version: String,
    #[serde(rename = "type")]
    pub release_type: String,
    pub release_date: DateTime<Utc>,
    pub url: String,
}

/// Contents of `versions.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionList {
    #[serde(default)]
    pub versions: Vec<VersionInfo>,
}

impl VersionList {
    /// Add or replace the entry for `info.build_version`, keeping the list
    /// ordered by build version.
    pub fn register(&mut self, info: VersionInfo) {
        self.versions.retain(|v| v.build_version != info.build_version);
        self.versions.push(info);
        self.versions
            .sort_by(|a, b| a.build_version.cmp(&b.build_version));
    }
}

/// Refuse to publish metadata referring to placeholder versions.
pub fn check_versions(versions: &VersionStamps) -> Result<(), IndexerError> {
    if versions.hub == "master" {
        return Err(IndexerError::PublishPrecondition(
            "refusing to publish with hub version 'master'".to_string(),
        ));
    }
    if versions.app == "master" {
        return Err(IndexerError::PublishPrecondition(
            "refusing to publish with app version 'master'".to_string(),
        ));
    }
    if versions.standalone.as_deref().map_or(true, str::is_empty) {
        return Err(IndexerError::PublishPrecondition(
            "standalone version is not defined".to_string(),
        ));
    }
    Ok(())
}

/// `{release_path}/{prev}-{index}`
pub fn release_folder_for(release_path: &Path, prev: &str, index: &str) -> PathBuf {
    release_path.join(format!("{}-{}", prev, index))
}

fn join_key(folder: &str, name: &str) -> String {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder, name)
    }
}

/// Upload `release_{version}.*` notes from `release_folder` to
/// `{folder}/{version}/`. Returns links to the txt and json notes.
pub async fn upload_release_notes(
    store: &dyn ObjectStore,
    release_folder: &Path,
    folder: &str,
    version: &str,
) -> Result<ReleaseChanges, IndexerError> {
    let note_prefix = format!("release_{}.", version);
    let base = join_key(folder, version);
    let mut changes = ReleaseChanges::default();

    let mut entries = tokio::fs::read_dir(release_folder).await?;
    let mut notes = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&note_prefix) && entry.file_type().await?.is_file() {
            notes.push((name, entry.path()));
        }
    }
    notes.sort();

    for (name, path) in notes {
        let key = join_key(&base, &name);
        store.upload(&path, &key, ObjectMetadata::new()).await?;
        debug!(note = %name, key = %key, "Uploaded release note");
        let link = Some(ChangeLink {
            url: store.url_for(&key),
        });
        match name.strip_prefix(&note_prefix) {
            Some("txt") => changes.txt = link,
            Some("json") => changes.json = link,
            _ => {}
        }
    }
    info!(version = %version, folder = %base, "Release notes uploaded");
    Ok(changes)
}

/// Write `{diff_path}/{version}.json` and upload it to `{folder}/{version}.json`
/// stamped with `lastmodified`. Returns the object URL.
pub async fn upload_release_metadata(
    store: &dyn ObjectStore,
    diff_path: &Path,
    folder: &str,
    meta: &ReleaseMetadata,
    last_modified: Option<DateTime<Utc>>,
) -> Result<String, IndexerError> {
    let file_name = format!("{}.json", meta.build_version);
    tokio::fs::create_dir_all(diff_path).await?;
    let local = diff_path.join(&file_name);
    tokio::fs::write(&local, serde_json::to_vec_pretty(meta)?).await?;

    let mut metadata = ObjectMetadata::new();
    if let Some(ts) = last_modified {
        metadata.insert("lastmodified".to_string(), ts.timestamp().to_string());
    }
    let key = join_key(folder, &file_name);
    store.upload(&local, &key, metadata).await?;
    Ok(store.url_for(&key))
}

/// Register `info` in `{folder}/versions.json` and point `latest.json` at it.
pub async fn register_version(
    store: &dyn ObjectStore,
    folder: &str,
    info: VersionInfo,
) -> Result<VersionList, IndexerError> {
    let versions_key = join_key(folder, VERSIONS_KEY);
    let mut list: VersionList = match store.fetch(&versions_key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)?,
        None => VersionList::default(),
    };
    let latest = serde_json::to_vec_pretty(&info)?;
    list.register(info);

    store
        .put_bytes(&versions_key, serde_json::to_vec_pretty(&list)?, ObjectMetadata::new())
        .await?;
    store
        .put_bytes(&join_key(folder, LATEST_KEY), latest, ObjectMetadata::new())
        .await?;
    Ok(list)
}
