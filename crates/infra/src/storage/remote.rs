//! GCS-compatible object store over its JSON/upload HTTP API.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use tracing::debug;

use super::{validate_key, StorageBackend, StorageError, StorageKind, AUDIO_CONTENT_TYPE};

pub const DEFAULT_API_BASE: &str = "https://storage.googleapis.com";
pub const DEFAULT_PUBLIC_BASE: &str = "https://storage.googleapis.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStorageConfig {
    pub bucket: String,
    pub api_base: String,
    pub public_base: String,
    /// OAuth bearer token; anonymous requests when absent (emulators, signed proxies).
    pub access_token: Option<String>,
}

impl RemoteStorageConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            public_base: DEFAULT_PUBLIC_BASE.to_string(),
            access_token: None,
        }
    }
}

/// Publicly readable objects in one bucket.
#[derive(Debug, Clone)]
pub struct RemoteStorage {
    client: Client,
    config: RemoteStorageConfig,
}

impl RemoteStorage {
    pub fn new(config: RemoteStorageConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, mut config: RemoteStorageConfig) -> Self {
        config.api_base = config.api_base.trim_end_matches('/').to_string();
        config.public_base = config.public_base.trim_end_matches('/').to_string();
        Self { client, config }
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    fn public_prefix(&self) -> String {
        format!("{}/{}/", self.config.public_base, self.config.bucket)
    }

    fn upload_url(&self, key: &str) -> Result<Url, StorageError> {
        let mut url = parse_url(&format!(
            "{}/upload/storage/v1/b/{}/o",
            self.config.api_base, self.config.bucket
        ))?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key)
            .append_pair("predefinedAcl", "publicRead");
        Ok(url)
    }

    fn object_url(&self, key: &str) -> Result<Url, StorageError> {
        let mut url = parse_url(&format!(
            "{}/storage/v1/b/{}/o",
            self.config.api_base, self.config.bucket
        ))?;
        // The whole key is one path segment; `/` inside it gets percent-encoded.
        url.path_segments_mut()
            .map_err(|_| StorageError::Transport(format!("api base cannot carry a path: {}", self.config.api_base)))?
            .push(key);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl StorageBackend for RemoteStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Remote
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        validate_key(key)?;
        let size = bytes.len();
        let request = self
            .client
            .post(self.upload_url(key)?)
            .header(reqwest::header::CONTENT_TYPE, AUDIO_CONTENT_TYPE)
            .body(bytes);

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StorageError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        debug!(key, bytes = size, bucket = %self.config.bucket, "artifact uploaded");
        Ok(format!("{}{}", self.public_prefix(), key))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        let request = self.client.delete(self.object_url(key)?);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(StorageError::Remote {
            status: status.as_u16(),
            message,
        })
    }

    fn resolve(&self, _reference: &str) -> Option<PathBuf> {
        None
    }

    fn key_for(&self, reference: &str) -> Option<String> {
        let key = reference.strip_prefix(&self.public_prefix())?;
        validate_key(key).ok()?;
        Some(key.to_string())
    }
}

fn parse_url(raw: &str) -> Result<Url, StorageError> {
    Url::parse(raw).map_err(|e| StorageError::Transport(format!("invalid url {raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::body::Bytes;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::{delete, get, post};
    use axum::Router;

    #[derive(Clone, Default)]
    struct FakeBucket {
        objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        last_auth: Arc<Mutex<Option<String>>>,
        last_acl: Arc<Mutex<Option<String>>>,
    }

    async fn upload(
        State(bucket): State<FakeBucket>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> AxumStatus {
        *bucket.last_auth.lock().unwrap() = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        *bucket.last_acl.lock().unwrap() = query.get("predefinedAcl").cloned();
        match (query.get("uploadType"), query.get("name")) {
            (Some(kind), Some(name)) if kind == "media" => {
                bucket.objects.lock().unwrap().insert(name.clone(), body.to_vec());
                AxumStatus::OK
            }
            _ => AxumStatus::BAD_REQUEST,
        }
    }

    async fn remove(
        State(bucket): State<FakeBucket>,
        Path((_bucket, object)): Path<(String, String)>,
    ) -> AxumStatus {
        match bucket.objects.lock().unwrap().remove(&object) {
            Some(_) => AxumStatus::NO_CONTENT,
            None => AxumStatus::NOT_FOUND,
        }
    }

    async fn public_read(
        State(bucket): State<FakeBucket>,
        Path((_bucket, key)): Path<(String, String)>,
    ) -> Result<Vec<u8>, AxumStatus> {
        bucket
            .objects
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(AxumStatus::NOT_FOUND)
    }

    async fn spawn_fake() -> (String, FakeBucket) {
        let bucket = FakeBucket::default();
        let app = Router::new()
            .route("/upload/storage/v1/b/:bucket/o", post(upload))
            .route("/storage/v1/b/:bucket/o/:object", delete(remove))
            .route("/public/:bucket/*key", get(public_read))
            .with_state(bucket.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), bucket)
    }

    fn storage_for(base: &str, token: Option<&str>) -> RemoteStorage {
        RemoteStorage::new(RemoteStorageConfig {
            bucket: "songs".to_string(),
            api_base: base.to_string(),
            public_base: format!("{base}/public/"),
            access_token: token.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn upload_is_public_and_dereferenceable() {
        let (base, bucket) = spawn_fake().await;
        let storage = storage_for(&base, Some("tok"));

        let reference = storage.put("abc.wav", b"RIFF".to_vec()).await.unwrap();
        assert_eq!(reference, format!("{base}/public/songs/abc.wav"));
        assert_eq!(bucket.last_acl.lock().unwrap().as_deref(), Some("publicRead"));
        assert_eq!(bucket.last_auth.lock().unwrap().as_deref(), Some("Bearer tok"));

        let body = reqwest::get(&reference).await.unwrap().bytes().await.unwrap();
        assert_eq!(&body[..], b"RIFF");
    }

    #[tokio::test]
    async fn delete_treats_missing_object_as_success() {
        let (base, bucket) = spawn_fake().await;
        let storage = storage_for(&base, None);

        storage.put("anonymous/a.wav", b"x".to_vec()).await.unwrap();
        storage.delete("anonymous/a.wav").await.unwrap();
        assert!(bucket.objects.lock().unwrap().is_empty());
        storage.delete("anonymous/a.wav").await.unwrap();
    }

    #[tokio::test]
    async fn server_errors_surface_as_remote_errors() {
        let (base, _bucket) = spawn_fake().await;
        let storage = RemoteStorage::new(RemoteStorageConfig {
            api_base: format!("{base}/nowhere"),
            ..storage_for(&base, None).config
        });

        let err = storage.put("x.wav", b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, StorageError::Remote { status: 404, .. }));
    }

    #[test]
    fn key_for_only_accepts_own_references() {
        let storage = storage_for("http://localhost:1", None);
        assert_eq!(
            storage.key_for("http://localhost:1/public/songs/anonymous/a.wav").as_deref(),
            Some("anonymous/a.wav")
        );
        assert_eq!(storage.key_for("http://localhost:1/public/other/a.wav"), None);
        assert_eq!(storage.key_for("/storage/a.wav"), None);
        assert!(storage.resolve("http://localhost:1/public/songs/a.wav").is_none());
    }
}
