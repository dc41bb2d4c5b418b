//! Session gateway: bridges one client transport to one remote session.
//!
//! Two kinds of gateway share the same lifecycle and offload machinery:
//!
//! - [`terminal`] relays raw bytes between the client and an interactive
//!   shell in both directions at once.
//! - [`files`] runs a strict request/response pipeline of file operations.
//!
//! Both are generic over the transport (a [`Sink`] of [`Frame`]s and a
//! [`Stream`] of them) so they run unchanged over an axum WebSocket or an
//! in-memory channel in tests.

pub mod files;
pub mod lifecycle;
pub mod offload;
pub mod protocol;
pub mod terminal;

use std::fmt::Display;

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::remote::{RemoteSession, Target};
use lifecycle::{GatewaySession, SessionState};

/// One transport message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

pub async fn send_frame<Si>(sink: &mut Si, frame: Frame) -> GatewayResult<()>
where
    Si: Sink<Frame> + Unpin,
    Si::Error: Display,
{
    sink.send(frame).await.map_err(|e| {
        debug!("transport send failed: {e}");
        GatewayError::TransportDisconnect
    })
}

pub async fn send_json<Si, T>(sink: &mut Si, value: &T) -> GatewayResult<()>
where
    Si: Sink<Frame> + Unpin,
    Si::Error: Display,
    T: Serialize + ?Sized,
{
    let text = serde_json::to_string(value)?;
    send_frame(sink, Frame::Text(text)).await
}

/// Next data frame. A close frame, end of stream, or transport error all
/// mean the client is gone.
pub async fn next_frame<St, E>(stream: &mut St) -> GatewayResult<Frame>
where
    St: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    match stream.next().await {
        Some(Ok(Frame::Close)) | None => Err(GatewayError::TransportDisconnect),
        Some(Ok(frame)) => Ok(frame),
        Some(Err(e)) => {
            debug!("transport receive failed: {e}");
            Err(GatewayError::TransportDisconnect)
        }
    }
}

/// Read the connection target, which must be the first message.
pub async fn read_target<St, E>(stream: &mut St) -> GatewayResult<Target>
where
    St: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    match next_frame(stream).await? {
        Frame::Text(text) => serde_json::from_str(&text)
            .map_err(|e| GatewayError::ProtocolDecode(format!("invalid connection request: {e}"))),
        _ => Err(GatewayError::ProtocolDecode(
            "expected a JSON connection request".into(),
        )),
    }
}

/// What happened to a finished gateway session.
#[derive(Debug)]
pub struct SessionSummary {
    pub id: Uuid,
    pub state: SessionState,
    pub reached_active: bool,
    /// Completed file operations (always 0 for terminals).
    pub operations: u64,
    /// `None` when the remote side ended the session cleanly.
    pub error: Option<GatewayError>,
}

impl SessionSummary {
    pub fn log(&self, kind: &str) {
        match &self.error {
            None => info!(
                "{kind} session {} closed ({} operations)",
                self.id, self.operations
            ),
            Some(e) if e.is_disconnect() => info!(
                "{kind} session {}: client disconnected ({} operations)",
                self.id, self.operations
            ),
            Some(e) => warn!("{kind} session {} ended: {e}", self.id),
        }
    }
}

/// Which session-ending errors are reported to the client as a JSON error
/// object before the transport closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorReport {
    /// Any error other than a disconnect.
    Always,
    /// Only errors raised before the session became active. Once a raw
    /// byte stream is flowing, the channel carries no JSON.
    BeforeActive,
}

/// Report a session-ending error to the client, release remote resources
/// innermost-first, then close the transport.
pub(crate) async fn teardown<S, Si>(
    session: &mut GatewaySession<S>,
    sink: &mut Si,
    result: GatewayResult<()>,
    operations: u64,
    report: ErrorReport,
) -> SessionSummary
where
    S: RemoteSession,
    Si: Sink<Frame> + Unpin,
    Si::Error: Display,
{
    let error = result.err();
    let reportable = match report {
        ErrorReport::Always => true,
        ErrorReport::BeforeActive => !session.reached_active(),
    };
    if let Some(e) = &error {
        if reportable && !e.is_disconnect() {
            let _ = send_json(sink, &e.to_message()).await;
        }
    }
    session.close().await;
    let _ = sink.close().await;
    SessionSummary {
        id: session.id(),
        state: session.state(),
        reached_active: session.reached_active(),
        operations,
        error,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport for gateway tests.

    use std::convert::Infallible;

    use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
    use futures::stream::{self, BoxStream};
    use futures::StreamExt;

    use super::Frame;

    /// Client frames followed by end-of-stream.
    pub fn closing(frames: Vec<Frame>) -> BoxStream<'static, Result<Frame, Infallible>> {
        stream::iter(frames).map(Ok).boxed()
    }

    /// Client frames, after which the client stays connected and silent.
    pub fn lingering(frames: Vec<Frame>) -> BoxStream<'static, Result<Frame, Infallible>> {
        stream::iter(frames)
            .map(Ok)
            .chain(stream::pending())
            .boxed()
    }

    pub fn sink() -> (UnboundedSender<Frame>, UnboundedReceiver<Frame>) {
        mpsc::unbounded()
    }

    /// Drain everything the gateway sent. Call after the sink is closed.
    pub fn collect(rx: &mut UnboundedReceiver<Frame>) -> Vec<Frame> {
        let mut out = Vec::new();
        while let Ok(Some(frame)) = rx.try_next() {
            out.push(frame);
        }
        out
    }

    pub fn text(value: &serde_json::Value) -> Frame {
        Frame::Text(value.to_string())
    }

    pub fn json(frame: &Frame) -> serde_json::Value {
        match frame {
            Frame::Text(t) => serde_json::from_str(t).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_read_target() {
        let mut stream = closing(vec![Frame::Text(
            crate::remote::mock::target_frame(),
        )]);
        let target = read_target(&mut stream).await.unwrap();
        assert_eq!(target.username, "ops");
    }

    #[tokio::test]
    async fn test_read_target_rejects_garbage() {
        let mut stream = closing(vec![Frame::Text("not json".into())]);
        let err = read_target(&mut stream).await.unwrap_err();
        assert_eq!(err.code(), "PROTOCOL_ERROR");

        let mut stream = closing(vec![Frame::Binary(vec![1, 2])]);
        assert!(read_target(&mut stream).await.is_err());

        let mut stream = closing(vec![]);
        assert!(read_target(&mut stream).await.unwrap_err().is_disconnect());
    }

    #[tokio::test]
    async fn test_send_json() {
        let (mut tx, mut rx) = sink();
        send_json(&mut tx, &json!({"a": 1})).await.unwrap();
        tx.close_channel();
        let frames = collect(&mut rx);
        assert_eq!(json(&frames[0])["a"], 1);
    }
}
