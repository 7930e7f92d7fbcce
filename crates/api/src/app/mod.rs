//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: backend selection and background tasks
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use songsmith_infra::Settings;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{build_services, AppServices, BootError};

/// Build the full HTTP router over already-wired services.
pub fn router(services: Arc<AppServices>) -> Router {
    let auth_state = middleware::AuthState {
        jwt: services.jwt.clone(),
        accounts: services.accounts.clone(),
    };
    let admin_state = middleware::AdminState {
        token: services.admin_token.clone(),
    };

    // Bearer token of a known user.
    let protected = routes::protected_router().route_layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    // X-Admin-Token.
    let admin = routes::admin_router().route_layer(axum::middleware::from_fn_with_state(
        admin_state,
        middleware::admin_middleware,
    ));

    Router::new()
        .merge(routes::public_router())
        .merge(protected)
        .merge(admin)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}

/// Wire services from `settings`, start the model warm-up, and build the router.
pub async fn build_app(settings: &Settings) -> Result<(Router, Arc<AppServices>), BootError> {
    let services = Arc::new(build_services(settings).await?);
    services.warm_up();
    Ok((router(services.clone()), services))
}
