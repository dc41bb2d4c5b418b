//! Interactive terminal bridge.
//!
//! After the handshake two pumps run concurrently:
//!
//! - **outbound** polls the shell channel without blocking, decodes what it
//!   finds as UTF-8 and sends it to the client as text. When nothing is
//!   ready it sleeps for the poll interval.
//! - **inbound** forwards every client frame to the shell verbatim.
//!
//! Whichever pump finishes first (remote EOF, client disconnect, or an
//! error) cancels the other, and the session is torn down.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, Stream};
use tracing::info;

use super::lifecycle::GatewaySession;
use super::offload::Handle;
use super::{next_frame, read_target, send_frame, teardown, ErrorReport, Frame, SessionSummary};
use crate::config::Config;
use crate::error::{GatewayError, GatewayResult};
use crate::remote::{Readiness, RemoteConnector, ShellChannel, TerminalSpec};

#[derive(Debug, Clone)]
pub struct TerminalSettings {
    pub spec: TerminalSpec,
    pub poll_interval: Duration,
    pub read_buffer_size: usize,
    pub connect_timeout: Duration,
}

impl TerminalSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            spec: TerminalSpec {
                term: config.terminal.term.clone(),
                rows: config.terminal.rows,
                cols: config.terminal.cols,
            },
            poll_interval: config.terminal.poll_interval(),
            read_buffer_size: config.terminal.read_buffer_size.max(1),
            connect_timeout: config.ssh.connect_timeout(),
        }
    }
}

/// Run one terminal session to completion.
pub async fn run<C, Si, St, E>(
    connector: Arc<C>,
    settings: TerminalSettings,
    mut sink: Si,
    mut stream: St,
) -> SessionSummary
where
    C: RemoteConnector,
    Si: Sink<Frame> + Unpin,
    Si::Error: Display,
    St: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    let mut session = GatewaySession::new();
    let result = bridge(&mut session, &connector, &settings, &mut sink, &mut stream).await;
    teardown(&mut session, &mut sink, result, 0, ErrorReport::BeforeActive).await
}

async fn bridge<C, Si, St, E>(
    session: &mut GatewaySession<C::Session>,
    connector: &Arc<C>,
    settings: &TerminalSettings,
    sink: &mut Si,
    stream: &mut St,
) -> GatewayResult<()>
where
    C: RemoteConnector,
    Si: Sink<Frame> + Unpin,
    Si::Error: Display,
    St: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    let target = read_target(stream).await?;
    info!("terminal session {}: connecting to {target}", session.id());
    session
        .authenticate(connector, target, settings.connect_timeout)
        .await?;
    let shell = session.open_shell(settings.spec.clone()).await?;
    session.activate();

    tokio::select! {
        result = pump_output(&shell, sink, settings) => result,
        result = pump_input(&shell, stream) => result,
    }
}

async fn pump_output<Sh, Si>(
    shell: &Handle<Sh>,
    sink: &mut Si,
    settings: &TerminalSettings,
) -> GatewayResult<()>
where
    Sh: ShellChannel,
    Si: Sink<Frame> + Unpin,
    Si::Error: Display,
{
    let mut decoder = Utf8Decoder::default();
    let size = settings.read_buffer_size;
    loop {
        let (readiness, buf) = shell
            .call("shell_read", move |channel| {
                let mut buf = vec![0u8; size];
                let readiness = channel.try_read(&mut buf)?;
                Ok((readiness, buf))
            })
            .await?;
        match readiness {
            Readiness::Ready(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() {
                    send_frame(sink, Frame::Text(text)).await?;
                }
            }
            Readiness::Idle => tokio::time::sleep(settings.poll_interval).await,
            Readiness::Eof => {
                let tail = decoder.finish();
                if !tail.is_empty() {
                    send_frame(sink, Frame::Text(tail)).await?;
                }
                return Ok(());
            }
        }
    }
}

async fn pump_input<Sh, St, E>(shell: &Handle<Sh>, stream: &mut St) -> GatewayResult<()>
where
    Sh: ShellChannel,
    St: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    loop {
        let data = match next_frame(stream).await {
            Ok(Frame::Text(text)) => text.into_bytes(),
            Ok(Frame::Binary(bytes)) => bytes,
            Ok(Frame::Close) | Err(GatewayError::TransportDisconnect) => return Ok(()),
            Err(e) => return Err(e),
        };
        shell
            .call("shell_write", move |channel| channel.write_all(&data))
            .await?;
    }
}

/// Incremental UTF-8 decoder.
///
/// A multi-byte sequence split across two reads is held back until the rest
/// arrives. Bytes that can never form valid UTF-8 become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, input: &[u8]) -> String {
        self.pending.extend_from_slice(input);
        let mut out = String::new();
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        let tail = rest.to_vec();
        self.pending = tail;
        out
    }

    /// Flush whatever is still held back. Called at end of stream.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::lifecycle::SessionState;
    use crate::gateway::testing::*;
    use crate::remote::mock::{self, MockConnector};
    use std::time::Instant;

    fn settings() -> TerminalSettings {
        let mut config = Config::default();
        config.terminal.poll_interval_ms = 5;
        config.terminal.read_buffer_size = 8;
        TerminalSettings::from_config(&config)
    }

    fn texts(frames: &[Frame]) -> String {
        frames
            .iter()
            .filter_map(|f| match f {
                Frame::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_decoder_split_sequence() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "héllo".as_bytes();
        assert_eq!(decoder.decode(&bytes[..2]), "h");
        assert_eq!(decoder.decode(&bytes[2..]), "éllo");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(decoder.decode(b"\xe2\x82"), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[tokio::test]
    async fn test_remote_eof_closes_session() {
        let connector = Arc::new(MockConnector {
            shell_output: vec![b"welcome\r\n".to_vec(), b"$ ".to_vec()],
            ..MockConnector::default()
        });
        let (tx, mut rx) = sink();
        let stream = lingering(vec![Frame::Text(mock::target_frame())]);

        let started = Instant::now();
        let summary = run(Arc::clone(&connector), settings(), tx, stream).await;
        assert!(started.elapsed() < Duration::from_secs(2));

        assert_eq!(summary.state, SessionState::Closed);
        assert!(summary.reached_active);
        assert!(summary.error.is_none());
        assert_eq!(texts(&collect(&mut rx)), "welcome\r\n$ ");
        assert_eq!(
            connector.log.matching("close"),
            vec!["close shell", "close session"]
        );
    }

    #[tokio::test]
    async fn test_client_input_reaches_shell() {
        let connector = Arc::new(MockConnector {
            shell_eof: false,
            ..MockConnector::default()
        });
        let (tx, _rx) = sink();
        let stream = closing(vec![
            Frame::Text(mock::target_frame()),
            Frame::Text("ls -la\n".into()),
            Frame::Binary(vec![0x03]),
        ]);

        let summary = run(Arc::clone(&connector), settings(), tx, stream).await;
        assert_eq!(connector.log.written(), b"ls -la\n\x03");
        assert!(summary.reached_active);
        assert!(summary.error.is_none());
        assert_eq!(summary.state, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_remote_failure_after_active_sends_no_json() {
        let connector = Arc::new(MockConnector {
            shell_output: vec![b"$ ".to_vec()],
            shell_eof: false,
            shell_error: Some("channel reset".into()),
            ..MockConnector::default()
        });
        let (tx, mut rx) = sink();
        let stream = lingering(vec![Frame::Text(mock::target_frame())]);

        let summary = run(Arc::clone(&connector), settings(), tx, stream).await;
        assert!(summary.reached_active);
        assert_eq!(summary.state, SessionState::Closed);
        assert_eq!(summary.error.as_ref().map(GatewayError::code), Some("REMOTE_ERROR"));

        let frames = collect(&mut rx);
        assert_eq!(frames, vec![Frame::Text("$ ".into())]);
        assert_eq!(
            connector.log.matching("close"),
            vec!["close shell", "close session"]
        );
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let connector = Arc::new(MockConnector::rejecting("bad password"));
        let (tx, mut rx) = sink();
        let stream = lingering(vec![Frame::Text(mock::target_frame())]);

        let summary = run(Arc::clone(&connector), settings(), tx, stream).await;
        assert!(!summary.reached_active);
        assert_eq!(summary.state, SessionState::Closed);
        assert_eq!(summary.error.as_ref().map(GatewayError::code), Some("AUTH_FAILED"));

        let frames = collect(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(json(&frames[0])["code"], "AUTH_FAILED");
        assert!(connector.log.matching("open_shell").is_empty());
    }

    #[tokio::test]
    async fn test_binary_handshake_is_protocol_error() {
        let connector = Arc::new(MockConnector::default());
        let (tx, mut rx) = sink();
        let stream = lingering(vec![Frame::Binary(vec![1, 2, 3])]);

        let summary = run(Arc::clone(&connector), settings(), tx, stream).await;
        assert_eq!(summary.error.as_ref().map(GatewayError::code), Some("PROTOCOL_ERROR"));
        assert_eq!(json(&collect(&mut rx)[0])["type"], "error");
        assert!(connector.log.events().is_empty());
    }
}
