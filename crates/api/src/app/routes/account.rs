//! The caller's entitlement, plus administrative user provisioning and
//! entitlement overrides.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::info;

use songsmith_billing::User;
use songsmith_infra::ServiceError;

use crate::app::{dto, errors, services::AppServices};
use crate::context::UserContext;

pub async fn me(Extension(user): Extension<UserContext>) -> impl IntoResponse {
    Json(json!({ "user": dto::user_to_json(user.user()) }))
}

pub async fn provision_user(
    Extension(services): Extension<Arc<AppServices>>,
    payload: Result<Json<dto::ProvisionUserRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match dto::body(payload) {
        Ok(b) => b,
        Err(res) => return res,
    };

    match services.accounts.register(&body.email).await {
        Ok(user) => (
            StatusCode::CREATED,
            Json(json!({ "user": dto::user_to_json(&user) })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_user_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };
    user_response(services.accounts.get(id).await)
}

pub async fn upgrade_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    payload: Result<Json<dto::UpgradeUserRequest>, JsonRejection>,
) -> axum::response::Response {
    let id = match dto::parse_user_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };
    let body = match dto::body(payload) {
        Ok(b) => b,
        Err(res) => return res,
    };

    let result = services
        .billing
        .reconciler()
        .upgrade(id, &body.billing_id, body.token_budget)
        .await;
    if let Ok(Some(user)) = &result {
        info!(user_id = %user.id, token_budget = user.token_budget, "admin upgrade");
    }
    user_response(found(result.map_err(ServiceError::from)))
}

pub async fn downgrade_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_user_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };

    let result = services.billing.reconciler().downgrade(id).await;
    if let Ok(Some(user)) = &result {
        info!(user_id = %user.id, "admin downgrade");
    }
    user_response(found(result.map_err(ServiceError::from)))
}

fn found(result: Result<Option<User>, ServiceError>) -> Result<User, ServiceError> {
    result?.ok_or_else(|| songsmith_core::DomainError::not_found().into())
}

fn user_response(result: Result<User, ServiceError>) -> axum::response::Response {
    match result {
        Ok(user) => (StatusCode::OK, Json(json!({ "user": dto::user_to_json(&user) }))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
