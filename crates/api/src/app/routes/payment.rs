use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::info;

use songsmith_billing::SIGNATURE_HEADER;

use crate::app::{dto, errors, services::AppServices};
use crate::context::UserContext;

const DEFAULT_SUCCESS_URL: &str = "http://localhost:3000/payment/success";
const DEFAULT_CANCEL_URL: &str = "http://localhost:3000/payment/cancel";

/// Billing provider notifications. The body is verified byte-for-byte, so it
/// is taken raw.
pub async fn webhook(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    payload: Bytes,
) -> axum::response::Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match services.billing.handle_webhook(&payload, signature).await {
        Ok(outcome) => {
            info!(?outcome, "webhook processed");
            (StatusCode::OK, Json(dto::reconcile_outcome_to_json(&outcome))).into_response()
        }
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn config(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(services.billing.config())
}

pub async fn create_checkout_session(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    payload: Option<Json<dto::CheckoutSessionRequest>>,
) -> axum::response::Response {
    let body = payload.map(|Json(b)| b).unwrap_or_default();
    let success_url = body.success_url.as_deref().unwrap_or(DEFAULT_SUCCESS_URL);
    let cancel_url = body.cancel_url.as_deref().unwrap_or(DEFAULT_CANCEL_URL);

    match services
        .billing
        .create_checkout_session(user.user_id(), success_url, cancel_url)
        .await
    {
        Ok(session) => (
            StatusCode::OK,
            Json(json!({
                "session_id": session.id,
                "url": session.url,
            })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn cancel_subscription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    match services.billing.cancel_subscription(user.user_id()).await {
        Ok(cancelled) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "message": "subscription cancellation requested",
                "cancelled": cancelled,
            })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
