use axum::{
    routing::{get, post},
    Router,
};

pub mod account;
pub mod payment;
pub mod songs;
pub mod system;

/// Endpoints reachable without credentials.
pub fn public_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/storage/*key", get(system::serve_artifact))
        .route("/api/songs/anonymous", post(songs::create_anonymous_song))
        .route("/api/payment/webhook", post(payment::webhook))
        .route("/api/payment/config", get(payment::config))
}

/// Endpoints that need a bearer token.
pub fn protected_router() -> Router {
    Router::new()
        .route("/api/songs", post(songs::create_song).get(songs::list_songs))
        .route(
            "/api/songs/:id",
            get(songs::get_song)
                .put(songs::update_song)
                .delete(songs::delete_song),
        )
        .route("/api/me", get(account::me))
        .route(
            "/api/payment/create-checkout-session",
            post(payment::create_checkout_session),
        )
        .route(
            "/api/payment/cancel-subscription",
            post(payment::cancel_subscription),
        )
}

/// Endpoints that need the admin token.
pub fn admin_router() -> Router {
    Router::new()
        .route("/api/admin/users", post(account::provision_user))
        .route("/api/admin/users/:id", get(account::get_user))
        .route("/api/admin/users/:id/upgrade", post(account::upgrade_user))
        .route("/api/admin/users/:id/downgrade", post(account::downgrade_user))
}
