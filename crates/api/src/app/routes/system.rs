use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::warn;

use songsmith_infra::storage::{AUDIO_CONTENT_TYPE, LOCAL_URL_PREFIX};

use crate::app::{errors, services::AppServices};

pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let payment = if services.billing.is_enabled() {
        "enabled"
    } else {
        "disabled"
    };
    Json(json!({
        "status": "healthy",
        "storage": services.storage.kind().as_str(),
        "payment": payment,
        "model": services.model.readiness().as_str(),
        "executor": services.executor().stats(),
    }))
}

/// Serve a locally stored artifact. Remote backends hand out their own URLs,
/// so nothing resolves here for them.
pub async fn serve_artifact(
    Extension(services): Extension<Arc<AppServices>>,
    Path(key): Path<String>,
) -> axum::response::Response {
    let reference = format!("{LOCAL_URL_PREFIX}/{key}");
    let Some(path) = services.storage.resolve(&reference) else {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "file not found");
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, AUDIO_CONTENT_TYPE)],
            bytes,
        )
            .into_response(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "artifact vanished before it was read");
            errors::json_error(StatusCode::NOT_FOUND, "not_found", "file not found")
        }
    }
}
