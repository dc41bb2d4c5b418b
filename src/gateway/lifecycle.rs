//! Gateway session lifecycle.
//!
//! ```text
//! Connecting ──first message──▶ Authenticating ──channel open──▶ Active
//!      │                              │                            │
//!      └──────────────────────────────┴──────────────▶ Closing ◀───┘
//!                                                        │
//!                                                        ▼
//!                                                      Closed
//! ```
//!
//! A session owns at most one remote session and at most one shell or file
//! session on top of it. [`GatewaySession::close`] releases them innermost
//! first and is safe to call any number of times. Dropping a session that
//! was never closed (the handler task was aborted) releases the resources
//! on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use super::offload::{offload, Handle};
use crate::error::{GatewayError, GatewayResult};
use crate::remote::{
    ExecOutput, FileSession, RemoteConnector, RemoteSession, ShellChannel, Target, TerminalSpec,
};

/// Grace added on top of the collaborator's own connect timeout.
const CONNECT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Active,
    Closing,
    Closed,
}

pub struct GatewaySession<S: RemoteSession> {
    id: Uuid,
    state: SessionState,
    reached_active: bool,
    remote: Option<Handle<S>>,
    shell: Option<Handle<S::Shell>>,
    files: Option<Handle<S::Files>>,
}

impl<S: RemoteSession> Default for GatewaySession<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: RemoteSession> GatewaySession<S> {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Connecting,
            reached_active: false,
            remote: None,
            shell: None,
            files: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session was ever `Active`.
    pub fn reached_active(&self) -> bool {
        self.reached_active
    }

    fn transition(&mut self, to: SessionState) {
        debug!("session {}: {:?} -> {:?}", self.id, self.state, to);
        self.state = to;
        if to == SessionState::Active {
            self.reached_active = true;
        }
    }

    /// Connect and authenticate to `target` on the blocking pool.
    pub async fn authenticate<C>(
        &mut self,
        connector: &Arc<C>,
        target: Target,
        timeout: Duration,
    ) -> GatewayResult<()>
    where
        C: RemoteConnector<Session = S>,
    {
        self.transition(SessionState::Authenticating);
        let connector = Arc::clone(connector);
        let connect = offload("connect", move || connector.connect(&target, timeout));
        let session = tokio::time::timeout(timeout + CONNECT_GRACE, connect)
            .await
            .map_err(|_| GatewayError::Authentication("connection timed out".into()))??;
        self.remote = Some(Handle::new(session));
        Ok(())
    }

    fn remote(&self) -> GatewayResult<&Handle<S>> {
        self.remote
            .as_ref()
            .ok_or_else(|| GatewayError::remote("remote session is not open"))
    }

    pub async fn open_shell(&mut self, spec: TerminalSpec) -> GatewayResult<Handle<S::Shell>> {
        let shell = self
            .remote()?
            .call("open_shell", move |s| s.open_shell(&spec))
            .await?;
        let handle = Handle::new(shell);
        self.shell = Some(handle.clone());
        Ok(handle)
    }

    pub async fn open_files(&mut self) -> GatewayResult<Handle<S::Files>> {
        let files = self
            .remote()?
            .call("open_file_session", |s| s.open_file_session())
            .await?;
        let handle = Handle::new(files);
        self.files = Some(handle.clone());
        Ok(handle)
    }

    pub async fn exec(&self, script: String) -> GatewayResult<ExecOutput> {
        self.remote()?
            .call("exec", move |s| s.exec(&script))
            .await
    }

    /// The remote channel is open; traffic may flow.
    pub fn activate(&mut self) {
        self.transition(SessionState::Active);
    }

    /// Release shell/file session, then the remote session. Idempotent.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.transition(SessionState::Closing);
        if let Some(shell) = self.shell.take() {
            let _ = shell
                .call("close_shell", |c| {
                    c.close();
                    Ok(())
                })
                .await;
        }
        if let Some(files) = self.files.take() {
            let _ = files
                .call("close_files", |f| {
                    f.close();
                    Ok(())
                })
                .await;
        }
        if let Some(remote) = self.remote.take() {
            let _ = remote
                .call("close_session", |s| {
                    s.close();
                    Ok(())
                })
                .await;
        }
        self.transition(SessionState::Closed);
    }
}

impl<S: RemoteSession> Drop for GatewaySession<S> {
    fn drop(&mut self) {
        let shell = self.shell.take();
        let files = self.files.take();
        let remote = self.remote.take();
        if shell.is_none() && files.is_none() && remote.is_none() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        debug!("session {}: released on drop", self.id);
        runtime.spawn_blocking(move || {
            if let Some(shell) = shell {
                shell.inner().blocking_lock().close();
            }
            if let Some(files) = files {
                files.inner().blocking_lock().close();
            }
            if let Some(remote) = remote {
                remote.inner().blocking_lock().close();
            }
        });
    }
}
