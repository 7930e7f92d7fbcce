use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use songsmith_billing::User;
use songsmith_core::{SongId, UserId};
use songsmith_infra::billing::ReconcileOutcome;
use songsmith_infra::CreateSong;
use songsmith_songs::{MetadataPatch, Song};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateSongRequest {
    #[serde(default)]
    pub prompt: String,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(alias = "requested_budget")]
    pub max_tokens: Option<u32>,
}

impl From<CreateSongRequest> for CreateSong {
    fn from(body: CreateSongRequest) -> Self {
        CreateSong {
            prompt: body.prompt,
            title: body.title,
            description: body.description,
            requested_budget: body.max_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateSongRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

impl From<UpdateSongRequest> for MetadataPatch {
    fn from(body: UpdateSongRequest) -> Self {
        MetadataPatch {
            title: body.title,
            description: body.description,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnonymousSongRequest {
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckoutSessionRequest {
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProvisionUserRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct UpgradeUserRequest {
    pub billing_id: String,
    pub token_budget: Option<u32>,
}

// -------------------------
// Extraction helpers
// -------------------------

/// Unwrap a JSON body, turning rejections into the standard error body.
pub fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, axum::response::Response> {
    payload.map(|Json(v)| v).map_err(|rejection| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            rejection.body_text(),
        )
    })
}

/// Malformed ids are reported like unknown ones.
pub fn parse_song_id(raw: &str) -> Result<SongId, axum::response::Response> {
    raw.parse::<SongId>()
        .map_err(|_| errors::json_error(StatusCode::NOT_FOUND, "not_found", "song not found"))
}

pub fn parse_user_id(raw: &str) -> Result<UserId, axum::response::Response> {
    raw.parse::<UserId>()
        .map_err(|_| errors::json_error(StatusCode::NOT_FOUND, "not_found", "user not found"))
}

// -------------------------
// Response mapping
// -------------------------

pub fn song_to_json(song: &Song) -> JsonValue {
    json!({
        "id": song.id.to_string(),
        "owner_id": song.owner_id.to_string(),
        "title": song.title,
        "description": song.description,
        "prompt": song.prompt,
        "token_budget": song.token_budget,
        "status": song.status.as_str(),
        "result_reference": song.result_reference,
        "error_detail": song.error_detail,
        "created_at": song.created_at.to_rfc3339(),
        "updated_at": song.updated_at.to_rfc3339(),
    })
}

pub fn user_to_json(user: &User) -> JsonValue {
    json!({
        "id": user.id.to_string(),
        "email": user.email,
        "tier": user.tier.as_str(),
        "is_paid": user.is_paid(),
        "token_budget": user.token_budget,
        "external_billing_id": user.external_billing_id,
        "created_at": user.created_at.to_rfc3339(),
        "updated_at": user.updated_at.to_rfc3339(),
    })
}

pub fn reconcile_outcome_to_json(outcome: &ReconcileOutcome) -> JsonValue {
    match outcome {
        ReconcileOutcome::Applied {
            user_id,
            tier,
            changed,
        } => json!({
            "status": "success",
            "message": format!("user {user_id} is now {tier}"),
            "changed": changed,
        }),
        ReconcileOutcome::Ignored { reason } => json!({
            "status": "ignored",
            "message": reason,
        }),
    }
}
