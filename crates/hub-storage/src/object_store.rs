//! Object storage for published release artifacts.
//!
//! `LocalObjectStore` maps keys to files under a root folder. Object
//! metadata (such as `lastmodified`) is kept in a `{key}.meta.json` sidecar.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::StorageError;

/// User metadata attached to an object.
pub type ObjectMetadata = BTreeMap<String, String>;

const META_SUFFIX: &str = ".meta.json";

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file under `key`, overwriting any existing object.
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        metadata: ObjectMetadata,
    ) -> Result<(), StorageError>;

    /// Store raw bytes under `key`.
    async fn put_bytes(
        &self,
        key: &str,
        bytes: Vec<u8>,
        metadata: ObjectMetadata,
    ) -> Result<(), StorageError>;

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn metadata(&self, key: &str) -> Result<Option<ObjectMetadata>, StorageError>;

    /// Public URL of an object.
    fn url_for(&self, key: &str) -> String;
}

/// Folder-backed object store
pub struct LocalObjectStore {
    root: PathBuf,
    base_url: Option<String>,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.trim_start_matches('/').is_empty() || escapes || key.ends_with(META_SUFFIX) {
            return Err(StorageError::Key(format!("Invalid object key: '{}'", key)));
        }
        Ok(self.root.join(relative))
    }

    async fn write_metadata(&self, path: &Path, metadata: &ObjectMetadata) -> Result<(), StorageError> {
        let meta_path = sidecar(path);
        if metadata.is_empty() {
            match tokio::fs::remove_file(&meta_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(());
        }
        tokio::fs::write(&meta_path, serde_json::to_vec_pretty(metadata)?).await?;
        Ok(())
    }
}

fn sidecar(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(META_SUFFIX);
    PathBuf::from(name)
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        metadata: ObjectMetadata,
    ) -> Result<(), StorageError> {
        let bytes = tokio::fs::read(local_path).await?;
        self.put_bytes(key, bytes, metadata).await
    }

    async fn put_bytes(
        &self,
        key: &str,
        bytes: Vec<u8>,
        metadata: ObjectMetadata,
    ) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let size = bytes.len();
        tokio::fs::write(&path, bytes).await?;
        self.write_metadata(&path, &metadata).await?;
        debug!(key = %key, size, "Stored object");
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        read_optional(&self.object_path(key)?).await
    }

    async fn metadata(&self, key: &str) -> Result<Option<ObjectMetadata>, StorageError> {
        let path = self.object_path(key)?;
        if read_optional(&path).await?.is_none() {
            return Ok(None);
        }
        match read_optional(&sidecar(&path)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(Some(ObjectMetadata::new())),
        }
    }

    fn url_for(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        match &self.base_url {
            Some(base) => format!("{}/{}", base, key),
            None => format!("file://{}", self.root.join(key).display()),
        }
    }
}
