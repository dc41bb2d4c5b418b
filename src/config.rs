//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Command line** — `--port` replaces the port of `server.listen`
//! 2. **Environment variables** — `SSHGATE_LISTEN`, `SSHGATE_API_KEY`
//! 3. **Config file** — path via `--config <path>`, or `sshgate.toml` in CWD
//! 4. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:18001"
//! max_message_size = 67108864   # 64 MB, largest accepted WebSocket frame
//!
//! [auth]
//! api_key = "your-secret-key"   # omit to leave the gateway open
//!
//! [ssh]
//! connect_timeout_secs = 15
//!
//! [terminal]
//! term = "xterm"
//! rows = 24
//! cols = 80
//! poll_interval_ms = 50
//! read_buffer_size = 4096
//!
//! [transfer]
//! chunk_size = 65536
//! max_upload_size = 67108864
//!
//! [logging]
//! level = "info"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:18001`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Largest WebSocket message accepted, in bytes (default 64 MB). Bounds
    /// the single-frame upload payload.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Authentication settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Pre-shared Bearer token. Override with `SSHGATE_API_KEY`.
    /// When absent, every endpoint is open.
    pub api_key: Option<String>,
}

/// Remote connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// Upper bound on TCP connect + handshake + authentication (default 15 s,
    /// at least 1 s). Established sessions have no timeout.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Interactive shell settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalConfig {
    /// Terminal type requested for the PTY (default `xterm`).
    #[serde(default = "default_term")]
    pub term: String,
    /// PTY rows (default 24).
    #[serde(default = "default_rows")]
    pub rows: u16,
    /// PTY columns (default 80).
    #[serde(default = "default_cols")]
    pub cols: u16,
    /// Delay between channel polls when no output is ready (default 50 ms).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum bytes read from the channel per poll (default 4096).
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

/// File transfer settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Size of each binary frame sent during a download (default 64 KB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Largest accepted upload payload in bytes (default 64 MB).
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:18001".to_string()
}
fn default_max_message_size() -> usize {
    64 * 1024 * 1024
}
fn default_connect_timeout_secs() -> u64 {
    15
}
fn default_term() -> String {
    "xterm".to_string()
}
fn default_rows() -> u16 {
    24
}
fn default_cols() -> u16 {
    80
}
fn default_poll_interval_ms() -> u64 {
    50
}
fn default_read_buffer_size() -> usize {
    4096
}
fn default_chunk_size() -> usize {
    64 * 1024
}
fn default_max_upload_size() -> usize {
    64 * 1024 * 1024
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            term: default_term(),
            rows: default_rows(),
            cols: default_cols(),
            poll_interval_ms: default_poll_interval_ms(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_upload_size: default_max_upload_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SshConfig {
    /// Never zero: libssh2 reads 0 as "no timeout".
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

impl TerminalConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise looks
    /// for `sshgate.toml` in the current directory, falling back to compiled defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            Self::parse(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("sshgate.toml").exists() {
            let content =
                std::fs::read_to_string("sshgate.toml").expect("Failed to read sshgate.toml");
            Self::parse(&content).expect("Failed to parse sshgate.toml")
        } else {
            Config::default()
        };

        // Env var overrides
        if let Ok(key) = std::env::var("SSHGATE_API_KEY") {
            config.auth.api_key = Some(key);
        }
        if let Ok(listen) = std::env::var("SSHGATE_LISTEN") {
            config.server.listen = listen;
        }

        config
    }

    /// Parse a TOML document; missing sections take their defaults.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Replace the port of `server.listen`, keeping the bind address.
    pub fn override_port(&mut self, port: u16) {
        let host = self
            .server
            .listen
            .rsplit_once(':')
            .map_or("0.0.0.0", |(host, _)| host);
        self.server.listen = format!("{host}:{port}");
    }

    /// An empty `api_key` counts as unset.
    pub fn api_key(&self) -> Option<&str> {
        self.auth.api_key.as_deref().filter(|k| !k.is_empty())
    }
}
