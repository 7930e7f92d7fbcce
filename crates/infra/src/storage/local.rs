use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::{validate_key, StorageBackend, StorageError, StorageKind};

/// Route prefix under which local artifacts are served.
pub const LOCAL_URL_PREFIX: &str = "/storage";

/// Files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        let path = self.path_for(key)?;
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| StorageError::Io(format!("create {}: {e}", parent.display())))?;

        // Write then rename so readers never observe a partial file.
        let staging = parent.join(format!(".{}.part", Uuid::new_v4()));
        tokio::fs::write(&staging, &bytes)
            .await
            .map_err(|e| StorageError::Io(format!("write {}: {e}", staging.display())))?;
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(StorageError::Io(format!("rename to {}: {e}", path.display())));
        }

        debug!(key, bytes = bytes.len(), "artifact stored locally");
        Ok(format!("{LOCAL_URL_PREFIX}/{key}"))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(format!("remove {}: {e}", path.display()))),
        }
    }

    fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let key = self.key_for(reference)?;
        let path = self.path_for(&key).ok()?;
        path.is_file().then_some(path)
    }

    fn key_for(&self, reference: &str) -> Option<String> {
        let key = reference
            .strip_prefix(LOCAL_URL_PREFIX)?
            .strip_prefix('/')?;
        validate_key(key).ok()?;
        Some(key.to_string())
    }
}
