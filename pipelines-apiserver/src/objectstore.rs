//! Object Store
//!
//! Pipeline manifests and run artifacts, addressed by opaque string keys.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use pipelines_core::{Error, Result};

/// Key-addressed blob storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_file(&self, key: &str) -> Result<Vec<u8>>;

    async fn add_file(&self, contents: &[u8], key: &str) -> Result<()>;

    /// Remove `key`; a missing key is not an error
    async fn delete_file(&self, key: &str) -> Result<()>;

    /// Key under which a pipeline or pipeline version manifest is stored
    fn pipeline_key(&self, id: &str) -> String {
        format!("pipelines/{id}")
    }
}

/// Object store on a local directory
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a key below the root, refusing anything that would escape it
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(Error::invalid_input(format!("Invalid object key {key:?}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get_file(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::resource_not_found("Object", key))
            }
            Err(e) => Err(Error::internal(e, format!("Failed to read object {key}"))),
        }
    }

    async fn add_file(&self, contents: &[u8], key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::internal(e, format!("Failed to create the directory for {key}")))?;
        }
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| Error::internal(e, format!("Failed to write object {key}")))
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::internal(e, format!("Failed to delete object {key}"))),
        }
    }
}
