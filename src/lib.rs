#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! sshgate library — browser-to-SSH session gateway.
//!
//! This library exposes the building blocks of the `sshgate` binary:
//! - `gateway` — session lifecycle, blocking-call offload, terminal bridge, file pipeline
//! - `remote` — remote session collaborator traits and the libssh2 implementation
//! - `routes` — REST handlers and router assembly
//! - `ws` — WebSocket upgrades for the terminal and file channels
//! - `auth` — API key authentication middleware
//! - `config` — configuration loading
//! - `error` — gateway error taxonomy

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod remote;
pub mod routes;
pub mod state;
pub mod util;
pub mod ws;

// Re-export key types at crate root for convenience.
pub use auth::ApiKey;
pub use config::Config;
pub use error::{GatewayError, GatewayResult};
pub use state::AppState;
