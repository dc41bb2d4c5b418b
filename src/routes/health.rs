//! Unauthenticated health-check endpoint.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::SessionKind;
use crate::AppState;

/// `GET /api/health` — liveness probe.
///
/// Returns status, uptime, version and session counters. No authentication
/// required, suitable for load-balancer health checks.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let stats = &state.stats;
    Json(json!({
        "status": "ok",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": {
            "terminal": stats.active(SessionKind::Terminal),
            "files": stats.active(SessionKind::Files),
            "total": stats.total(),
        },
    }))
}

/// `GET /api/ping` — minimal liveness check. `pong` is the number of open
/// gateway sessions.
pub async fn ping(State(state): State<AppState>) -> Json<Value> {
    let stats = &state.stats;
    let open = stats.active(SessionKind::Terminal) + stats.active(SessionKind::Files);
    Json(json!({ "pong": open }))
}
