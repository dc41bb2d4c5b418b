//! Pre-shared API key authentication.
//!
//! When `auth.api_key` is configured, the REST endpoint requires an
//! `Authorization: Bearer <key>` header and the WebSocket upgrades require a
//! `?token=` query parameter (browsers can't set headers on WebSocket
//! upgrades). Without a configured key every endpoint is open.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Axum middleware that rejects requests without a valid `Authorization: Bearer`
/// header. The expected key is injected via the [`ApiKey`] extension.
///
/// # Error responses
///
/// - `401 Unauthorized` — header missing or malformed
/// - `403 Forbidden` — key present but invalid
/// - `500 Internal Server Error` — [`ApiKey`] extension not found (misconfiguration)
pub async fn require_api_key(request: Request, next: Next) -> Response {
    let api_key = match request.extensions().get::<ApiKey>() {
        Some(ApiKey(Some(key))) => key.clone(),
        Some(ApiKey(None)) => return next.run(request).await,
        None => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Server configuration error", "code": "CONFIG_ERROR"})),
            )
                .into_response();
        }
    };

    let provided = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(provided) = provided else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Missing or invalid Authorization header", "code": "UNAUTHORIZED"})),
        )
            .into_response();
    };

    if !constant_time_eq(api_key.as_bytes(), provided.as_bytes()) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Invalid API key", "code": "FORBIDDEN"})),
        )
            .into_response();
    }

    next.run(request).await
}

/// Check a WebSocket `?token=` against the configured key.
pub fn token_allowed(api_key: Option<&str>, token: Option<&str>) -> bool {
    match api_key {
        None => true,
        Some(key) => token.is_some_and(|t| constant_time_eq(key.as_bytes(), t.as_bytes())),
    }
}

/// Constant-time byte comparison to prevent timing side-channel attacks.
///
/// Always iterates over the full length of `expected` regardless of `provided`
/// length, so an attacker cannot determine the key length from response times.
pub fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    let mut diff = u8::from(expected.len() != provided.len());
    for (i, e) in expected.iter().enumerate() {
        diff |= e ^ provided.get(i).copied().unwrap_or(0xff);
    }
    diff == 0
}

/// Extension type carrying the expected API key (`None` = open gateway),
/// injected into the router layer so [`require_api_key`] can access it
/// without touching `AppState`.
#[derive(Clone)]
pub struct ApiKey(pub Option<String>);
