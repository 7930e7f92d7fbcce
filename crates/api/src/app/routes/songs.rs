use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::app::{dto, errors, services::AppServices};
use crate::context::UserContext;

pub async fn create_song(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    payload: Result<Json<dto::CreateSongRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match dto::body(payload) {
        Ok(b) => b,
        Err(res) => return res,
    };

    match services.songs.create(user.user_id(), body.into()).await {
        Ok(song) => (
            StatusCode::CREATED,
            Json(json!({
                "message": "song creation started",
                "song": dto::song_to_json(&song),
            })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_songs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    match services.songs.list(user.user_id()).await {
        Ok(songs) => {
            let items = songs.iter().map(dto::song_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(json!({ "songs": items }))).into_response()
        }
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_song(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_song_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };

    match services.songs.get(user.user_id(), id).await {
        Ok(song) => (StatusCode::OK, Json(json!({ "song": dto::song_to_json(&song) }))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn update_song(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::UpdateSongRequest>, JsonRejection>,
) -> axum::response::Response {
    let id = match dto::parse_song_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };
    let body = match dto::body(payload) {
        Ok(b) => b,
        Err(res) => return res,
    };

    match services
        .songs
        .update_metadata(user.user_id(), id, body.into())
        .await
    {
        Ok(song) => (
            StatusCode::OK,
            Json(json!({
                "message": "song updated",
                "song": dto::song_to_json(&song),
            })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn delete_song(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_song_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };

    match services.songs.delete(user.user_id(), id).await {
        Ok(song) => (
            StatusCode::OK,
            Json(json!({
                "message": "song deleted",
                "id": song.id.to_string(),
            })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Synchronous generation for callers without an account. Nothing is persisted
/// besides the artifact.
pub async fn create_anonymous_song(
    Extension(services): Extension<Arc<AppServices>>,
    payload: Result<Json<dto::AnonymousSongRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match dto::body(payload) {
        Ok(b) => b,
        Err(res) => return res,
    };

    match services.songs.generate_anonymous(&body.prompt).await {
        Ok(song) => (
            StatusCode::OK,
            Json(json!({
                "message": "song generated",
                "download_url": song.download_url,
                "song_id": song.song_id.to_string(),
            })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
