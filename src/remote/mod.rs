//! Remote session collaborator interface.
//!
//! The gateway never speaks SSH itself. It drives a remote-protocol client
//! through the four traits below, all of which are **blocking**: every call
//! may sit on the network for as long as the remote host takes. Callers must
//! route them through [`crate::gateway::offload`] so the event loop never
//! waits on remote I/O.
//!
//! ```text
//! RemoteConnector ──connect──▶ RemoteSession ──open_shell─────────▶ ShellChannel
//!                                    │        ──open_file_session─▶ FileSession
//!                                    └─exec (one combined script)
//! ```
//!
//! [`ssh`] implements the traits on top of libssh2.

use std::fmt;
use std::io::Read;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

#[cfg(test)]
pub(crate) mod mock;
pub mod ssh;

/// Replacement for `auth_value` in every outbound echo of a [`Target`].
pub const SECRET_MASK: &str = "***";

/// How the client authenticates to the remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// `auth_value` is the account password.
    Password,
    /// `auth_value` is a PEM-encoded private key.
    Key,
}

impl AuthType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Key => "key",
        }
    }
}

/// Connection target supplied by the client once per gateway session.
///
/// Never persisted. Only [`Target::redacted`] is ever serialized, and the
/// `Debug` impl masks the secret, so `auth_value` cannot reach a response or
/// a log line.
#[derive(Clone, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub name: String,
    #[serde(alias = "ip")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(alias = "ssh_username")]
    pub username: String,
    pub auth_type: AuthType,
    pub auth_value: String,
}

fn default_port() -> u16 {
    22
}

/// Serializable view of a [`Target`] with the secret replaced by [`SECRET_MASK`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedactedTarget {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_type: AuthType,
    pub auth_value: String,
}

impl Target {
    pub fn redacted(&self) -> RedactedTarget {
        RedactedTarget {
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            auth_type: self.auth_type,
            auth_value: SECRET_MASK.to_string(),
        }
    }

    /// Reject targets that cannot possibly connect.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.host.trim().is_empty() {
            return Err(GatewayError::Authentication("host is required".into()));
        }
        if self.username.trim().is_empty() {
            return Err(GatewayError::Authentication("username is required".into()));
        }
        if self.port == 0 {
            return Err(GatewayError::Authentication("port must be non-zero".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("auth_type", &self.auth_type)
            .field("auth_value", &SECRET_MASK)
            .finish()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// PTY parameters for an interactive shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSpec {
    pub term: String,
    pub rows: u16,
    pub cols: u16,
}

/// Captured result of a one-shot remote exec.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Attributes of a remote path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub permissions: u32,
    pub is_directory: bool,
    /// Unix seconds, when the server reports it.
    pub modified_time: Option<u64>,
}

/// One directory entry, a snapshot rather than a live handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileItem {
    pub name: String,
    pub size: u64,
    pub permissions: u32,
    pub is_directory: bool,
    pub modified_time: Option<u64>,
}

impl FileItem {
    pub fn new(name: impl Into<String>, stat: &FileStat) -> Self {
        Self {
            name: name.into(),
            size: stat.size,
            permissions: stat.permissions,
            is_directory: stat.is_directory,
            modified_time: stat.modified_time,
        }
    }
}

/// Outcome of one non-blocking read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// `n` bytes were copied into the buffer.
    Ready(usize),
    /// Nothing available yet; poll again later.
    Idle,
    /// The remote side closed the stream.
    Eof,
}

/// A byte source that can be checked without blocking.
///
/// Implementations backed by a real readiness notification may return
/// [`Readiness::Ready`] sooner, but must never block waiting for data.
pub trait PollableSource {
    fn try_read(&mut self, buf: &mut [u8]) -> GatewayResult<Readiness>;
}

/// Interactive shell channel with a PTY attached.
pub trait ShellChannel: PollableSource + Send + 'static {
    fn write_all(&mut self, data: &[u8]) -> GatewayResult<()>;
    /// Release the channel. Must be safe to call more than once.
    fn close(&mut self);
}

/// File-transfer session (SFTP or equivalent).
pub trait FileSession: Send + 'static {
    type Reader: Read + Send + 'static;

    /// Entries of a directory in the order the server returns them.
    fn list(&mut self, path: &str) -> GatewayResult<Vec<FileItem>>;
    /// `Ok(None)` when the path does not exist.
    fn stat(&mut self, path: &str) -> GatewayResult<Option<FileStat>>;
    /// Create one directory; the parent must already exist.
    fn mkdir(&mut self, path: &str) -> GatewayResult<()>;
    fn rename(&mut self, from: &str, to: &str) -> GatewayResult<()>;
    fn remove_file(&mut self, path: &str) -> GatewayResult<()>;
    fn remove_dir(&mut self, path: &str) -> GatewayResult<()>;
    fn open_read(&mut self, path: &str) -> GatewayResult<Self::Reader>;
    /// Create or truncate `path` and write `data`. Returns bytes written.
    fn write_file(&mut self, path: &str, data: &[u8]) -> GatewayResult<u64>;
    /// Release the session. Must be safe to call more than once.
    fn close(&mut self);
}

/// An authenticated remote session.
pub trait RemoteSession: Send + 'static {
    type Shell: ShellChannel;
    type Files: FileSession;

    fn open_shell(&mut self, spec: &TerminalSpec) -> GatewayResult<Self::Shell>;
    fn open_file_session(&mut self) -> GatewayResult<Self::Files>;
    /// Run `script` as a single remote command and collect its output.
    fn exec(&mut self, script: &str) -> GatewayResult<ExecOutput>;
    /// Disconnect. Must be safe to call more than once.
    fn close(&mut self);
}

/// Establishes authenticated sessions.
pub trait RemoteConnector: Send + Sync + 'static {
    type Session: RemoteSession;

    /// Connect and authenticate, giving up after `timeout`.
    fn connect(&self, target: &Target, timeout: Duration) -> GatewayResult<Self::Session>;
}
