#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # sshgate
//!
//! Browser-to-SSH session gateway.
//!
//! sshgate lets a browser client drive remote hosts over SSH through
//! WebSockets: an interactive terminal, a file-transfer channel, and a REST
//! endpoint that runs a batch of commands. The client supplies the host and
//! credentials per session; nothing is stored.
//!
//! ## API surface
//!
//! | Method | Path            | Auth   | Description                          |
//! |--------|-----------------|--------|--------------------------------------|
//! | GET    | `/api/health`   | No     | Liveness probe with session counters |
//! | GET    | `/api/ping`     | No     | Minimal liveness check               |
//! | POST   | `/api/ssh/test` | Yes    | Run commands on a node               |
//! | GET    | `/ws`           | Yes*   | Interactive terminal                 |
//! | GET    | `/ws/files`     | Yes*   | File operations                      |
//!
//! *WebSocket auth is via `?token=<key>` query param (no `Authorization` header
//! available during the upgrade handshake). Auth applies only when an API key
//! is configured.
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, clap args, tracing, graceful shutdown
//! auth.rs          — Bearer token middleware, constant-time comparison
//! config.rs        — TOML + env-var configuration
//! error.rs         — GatewayError taxonomy and wire codes
//! routes/
//!   health.rs      — GET /api/health, GET /api/ping
//!   exec.rs        — POST /api/ssh/test
//! ws/
//!   mod.rs         — WebSocket upgrades, Message <-> Frame adaptation
//! gateway/
//!   lifecycle.rs   — GatewaySession state machine, ordered release
//!   offload.rs     — blocking remote calls on the blocking pool
//!   terminal.rs    — bidirectional shell bridge, incremental UTF-8 decoding
//!   files.rs       — sequential file operation pipeline
//!   protocol.rs    — file channel wire types
//! remote/
//!   mod.rs         — collaborator traits (connector, session, shell, files)
//!   ssh.rs         — libssh2 implementation
//! ```

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use sshgate::{routes, AppState, Config};

/// Browser-to-SSH session gateway.
#[derive(Parser)]
#[command(name = "sshgate", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long)]
    config: Option<String>,
    /// Listen port, replacing the port of `server.listen`.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref());
    if let Some(port) = cli.port {
        config.override_port(port);
    }

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("sshgate v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);

    if config.api_key().is_none() {
        warn!("No API key configured, every endpoint is open (set SSHGATE_API_KEY)");
    }

    let state = AppState::new(config);
    let app = routes::router(state.clone());

    let listener = TcpListener::bind(&state.config.server.listen)
        .await
        .expect("Failed to bind");

    info!("Server ready");

    // Graceful shutdown
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server error");

    info!(
        "Shutting down after {} gateway sessions",
        state.stats.total()
    );
    info!("Goodbye");
}
