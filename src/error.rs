//! Gateway error taxonomy.
//!
//! Every failure that can reach a client is one of these variants. The
//! variant decides two things: the stable `code` string sent on the wire,
//! and whether the failure ends the session ([`GatewayError::is_fatal`]) or
//! is reported per-operation while the session stays open.

use serde_json::{json, Value};
use thiserror::Error;

/// Errors produced by the session gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Bad credentials, unreachable host, handshake failure, connect timeout.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The client closed the socket (or the socket broke underneath us).
    #[error("client disconnected")]
    TransportDisconnect,

    /// Malformed JSON or an unexpected frame type.
    #[error("protocol error: {0}")]
    ProtocolDecode(String),

    /// A remote call was rejected: missing path, permission denied, busy resource.
    #[error("{0}")]
    RemoteOperation(String),

    /// Unknown file operation tag.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A blocking worker task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Offload(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// Stable machine-readable code for the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "AUTH_FAILED",
            Self::TransportDisconnect => "DISCONNECTED",
            Self::ProtocolDecode(_) => "PROTOCOL_ERROR",
            Self::RemoteOperation(_) => "REMOTE_ERROR",
            Self::UnsupportedOperation(_) => "UNSUPPORTED_OPERATION",
            Self::Offload(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this error terminates the gateway session.
    ///
    /// Remote-operation failures and unknown operation tags are answered with a
    /// `success=false` result and the pipeline keeps reading requests.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::RemoteOperation(_) | Self::UnsupportedOperation(_)
        )
    }

    /// `true` for a plain client disconnect, which is normal termination.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::TransportDisconnect)
    }

    /// Session-level error object sent just before the gateway closes.
    pub fn to_message(&self) -> Value {
        json!({
            "type": "error",
            "code": self.code(),
            "message": self.to_string(),
            "success": false,
        })
    }

    pub fn remote(err: impl std::fmt::Display) -> Self {
        Self::RemoteOperation(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        Self::ProtocolDecode(e.to_string())
    }
}
