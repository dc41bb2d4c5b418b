//! WebSocket transport for the two gateway channels.
//!
//! ## Connection lifecycle
//!
//! 1. Client connects to `GET /ws` (terminal) or `GET /ws/files` (file
//!    transfer), with `?token=<api_key>` when a key is configured. The token
//!    is validated before the upgrade completes.
//! 2. The first message must be the connection target as JSON:
//!    `{"host", "port", "username", "auth_type", "auth_value"}`
//!    (`ip` / `ssh_username` are accepted as aliases).
//! 3. On the terminal channel every later frame is keystrokes for the shell,
//!    and shell output arrives as text frames. On the file channel every
//!    later frame is a JSON request (see [`crate::gateway::protocol`]).
//! 4. A session-ending failure is reported as
//!    `{"type":"error","code","message","success":false}` before the socket
//!    closes.

use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket},
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tracing::info;

use crate::auth;
use crate::gateway::{files, terminal, Frame};
use crate::state::SessionKind;
use crate::AppState;

/// Query parameters for the WebSocket upgrade request.
#[derive(Deserialize)]
pub struct WsQuery {
    /// API key passed as a query parameter (since HTTP headers aren't available
    /// during a browser WebSocket upgrade).
    pub token: Option<String>,
}

fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, "Forbidden").into_response()
}

/// `GET /ws?token=<key>` — interactive terminal.
pub async fn terminal_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if !auth::token_allowed(state.config.api_key(), query.token.as_deref()) {
        return forbidden();
    }

    let settings = terminal::TerminalSettings::from_config(&state.config);
    ws.max_message_size(state.config.server.max_message_size)
        .on_upgrade(move |socket| async move {
            let _guard = state.stats.enter(SessionKind::Terminal);
            info!("terminal channel opened");
            let (sink, stream) = frames(socket);
            let connector = Arc::clone(&state.connector);
            terminal::run(connector, settings, sink, stream)
                .await
                .log("terminal");
        })
}

/// `GET /ws/files?token=<key>` — file operations.
pub async fn files_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if !auth::token_allowed(state.config.api_key(), query.token.as_deref()) {
        return forbidden();
    }

    let settings = files::FileSettings::from_config(&state.config);
    ws.max_message_size(state.config.server.max_message_size)
        .on_upgrade(move |socket| async move {
            let _guard = state.stats.enter(SessionKind::Files);
            info!("file channel opened");
            let (sink, stream) = frames(socket);
            let connector = Arc::clone(&state.connector);
            files::run(connector, settings, sink, stream)
                .await
                .log("file");
        })
}

/// Adapt an axum socket to the gateway's frame transport. Ping and pong are
/// answered by axum and never reach the gateway.
fn frames(
    socket: WebSocket,
) -> (
    impl Sink<Frame, Error = axum::Error> + Unpin,
    impl Stream<Item = Result<Frame, axum::Error>> + Unpin,
) {
    let (sink, stream) = socket.split();
    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(into_message(frame))));
    let stream = stream.filter_map(|msg| future::ready(from_message(msg)));
    (sink, stream)
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
        Frame::Close => Message::Close(None),
    }
}

fn from_message(msg: Result<Message, axum::Error>) -> Option<Result<Frame, axum::Error>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
        Ok(Message::Binary(bytes)) => Some(Ok(Frame::Binary(bytes.to_vec()))),
        Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
        Ok(Message::Ping(_) | Message::Pong(_)) => None,
        Err(e) => Some(Err(e)),
    }
}
