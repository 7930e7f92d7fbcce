//! Artifact storage.
//!
//! A backend stores byte blobs under a logical key (`"{song_id}.wav"`,
//! `"anonymous/{uuid}.wav"`) and hands back a retrieval reference: a
//! server-relative path for the local backend, a public URL for the remote one.

mod local;
mod remote;

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use songsmith_core::SongId;

pub use local::{LocalStorage, LOCAL_URL_PREFIX};
pub use remote::{RemoteStorage, RemoteStorageConfig};

/// Content type of every stored artifact.
pub const AUDIO_CONTENT_TYPE: &str = "audio/wav";

#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("object store returned {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("object store unreachable: {0}")]
    Transport(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Local,
    Remote,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Local => "local",
            StorageKind::Remote => "remote",
        }
    }
}

/// Interchangeable blob store.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> StorageKind;

    /// Store `bytes` under `key`, replacing any previous blob. Returns the
    /// retrieval reference.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, StorageError>;

    /// Remove the blob under `key`. A missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Filesystem path behind a reference, for backends that serve files themselves.
    fn resolve(&self, reference: &str) -> Option<PathBuf>;

    /// Key behind a reference this backend produced.
    fn key_for(&self, reference: &str) -> Option<String>;
}

/// Key of a song's artifact.
pub fn song_key(id: SongId) -> String {
    format!("{id}.wav")
}

/// Key of an anonymous artifact.
pub fn anonymous_key(id: Uuid) -> String {
    format!("anonymous/{id}.wav")
}

/// Reject empty, absolute, and parent-escaping keys.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty".to_string()));
    }
    if key.contains('\\') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    let path = Path::new(key);
    let clean = path
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !clean || key.ends_with('/') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
