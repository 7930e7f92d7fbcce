use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;

use songsmith_auth::JwtValidator;
use songsmith_core::DomainError;
use songsmith_infra::{AccountService, ServiceError};

use crate::app::errors;
use crate::context::UserContext;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
    pub accounts: Arc<AccountService>,
}

/// Require a valid bearer token for a known user.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_bearer(req.headers()).ok_or_else(unauthorized)?;

    let claims = state.jwt.validate(token, Utc::now()).map_err(|e| {
        debug!(error = %e, "rejected bearer token");
        unauthorized()
    })?;

    let user = match state.accounts.get(claims.sub).await {
        Ok(user) => user,
        Err(ServiceError::Domain(DomainError::NotFound)) => {
            return Err(errors::json_error(
                StatusCode::NOT_FOUND,
                "not_found",
                "user not found",
            ));
        }
        Err(e) => return Err(errors::service_error_to_response(e)),
    };

    req.extensions_mut().insert(UserContext::new(user));
    Ok(next.run(req).await)
}

#[derive(Clone)]
pub struct AdminState {
    pub token: Option<Arc<str>>,
}

/// Require `X-Admin-Token` to match the configured admin token.
pub async fn admin_middleware(
    State(state): State<AdminState>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let Some(expected) = state.token.as_deref() else {
        return Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "not_configured",
            "admin routes are disabled",
        ));
    };

    let presented = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    match presented {
        Some(token) if tokens_match(token, expected) => {
            Ok(next.run(req).await)
        }
        _ => Err(unauthorized()),
    }
}

fn unauthorized() -> Response {
    errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", "unauthorized")
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?;
    let header = header.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

/// Compares fixed-length SHA-256 digests of both tokens.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let presented = Sha256::digest(presented.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    presented
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
