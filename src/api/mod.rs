//! HTTP surface.
//! Mission: wire the payment, ledger, and settlement engines behind axum routes,
//! with JWT auth on every route but login and the health check.

pub mod ledger;
pub mod payments;
pub mod settlements;
pub mod state;

pub use state::AppState;

use crate::auth;
use crate::middleware::request_logging_simple;
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

async fn health() -> StatusCode {
    StatusCode::OK
}

/// Builds the full application router: public auth/health routes, and the
/// protected business surface behind `auth_middleware`.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/payments", post(payments::charge))
        .route("/v1/ledger/transactions", post(ledger::post_transaction))
        .route("/v1/ledger/transactions/:id", get(ledger::get_transaction))
        .route("/v1/ledger/transactions/:id/reverse", post(ledger::reverse_transaction))
        .route("/v1/ledger/accounts/:code/balance", get(ledger::get_account_balance))
        .route("/v1/settlements", post(settlements::create))
        .route("/v1/settlements/:id", get(settlements::get))
        .route("/v1/settlements/:id/reserve", post(settlements::reserve))
        .route("/v1/settlements/:id/send", post(settlements::send))
        .route("/v1/settlements/:id/confirm", post(settlements::confirm))
        .route("/v1/settlements/:id/settle", post(settlements::settle))
        .route("/v1/settlements/:id/fail", post(settlements::fail))
        .route("/v1/settlements/:id/retry", post(settlements::retry))
        .route("/v1/auth/me", get(auth::api::get_current_user))
        .route("/v1/admin/users", get(auth::api::list_users).post(auth::api::create_user))
        .route("/v1/admin/users/:id", delete(auth::api::delete_user))
        .with_state(state.clone())
        .layer(from_fn_with_state(state.auth.jwt_handler.clone(), auth::middleware::auth_middleware));

    let public = Router::new()
        .route("/health", get(health))
        .route("/v1/auth/login", post(auth::api::login))
        .with_state(state.auth.clone());

    public
        .merge(protected)
        .layer(axum::middleware::from_fn(request_logging_simple))
        .layer(CorsLayer::permissive())
}
