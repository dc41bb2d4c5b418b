//! HTTP route handlers and router assembly.
//!
//! [`health`] (`/api/health`, `/api/ping`) is public. [`exec`] sits behind
//! [`crate::auth::require_api_key`]. The WebSocket upgrades in [`crate::ws`]
//! check their `?token=` themselves.

pub mod exec;
pub mod health;

use axum::{
    middleware,
    routing::{get, post},
    Extension, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{self, ApiKey};
use crate::ws;
use crate::AppState;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/health", get(health::health))
        .route("/api/ping", get(health::ping));

    let authed_routes = Router::new()
        .route("/api/ssh/test", post(exec::ssh_test))
        .layer(middleware::from_fn(auth::require_api_key));

    let ws_routes = Router::new()
        .route("/ws", get(ws::terminal_upgrade))
        .route("/ws/files", get(ws::files_upgrade));

    Router::new()
        .merge(public_routes)
        .merge(authed_routes)
        .merge(ws_routes)
        .layer(Extension(ApiKey(state.config.api_key().map(str::to_owned))))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
