//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::remote::ssh::SshConnector;

/// Shared application state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// Opens remote sessions for every gateway.
    pub connector: Arc<SshConnector>,
    /// Live and lifetime session counters.
    pub stats: Arc<GatewayStats>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            connector: Arc::new(SshConnector),
            stats: Arc::new(GatewayStats::default()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Terminal,
    Files,
}

/// Session counters. Atomics only; read by the health endpoint.
#[derive(Debug, Default)]
pub struct GatewayStats {
    terminal: AtomicUsize,
    files: AtomicUsize,
    total: AtomicU64,
}

impl GatewayStats {
    fn gauge(&self, kind: SessionKind) -> &AtomicUsize {
        match kind {
            SessionKind::Terminal => &self.terminal,
            SessionKind::Files => &self.files,
        }
    }

    /// Count a session as live until the returned guard drops.
    pub fn enter(self: &Arc<Self>, kind: SessionKind) -> SessionGuard {
        self.gauge(kind).fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        SessionGuard {
            stats: Arc::clone(self),
            kind,
        }
    }

    pub fn active(&self, kind: SessionKind) -> usize {
        self.gauge(kind).load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

pub struct SessionGuard {
    stats: Arc<GatewayStats>,
    kind: SessionKind,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.stats.gauge(self.kind).fetch_sub(1, Ordering::Relaxed);
    }
}
