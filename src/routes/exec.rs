//! Command test endpoint.
//!
//! - `POST /api/ssh/test` — connect to a node, run a list of commands as one
//!   remote script, and report the output
//!
//! Connection and authentication failures are not HTTP errors: the response
//! is always `200` with `success=false` and the reason in `error`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::gateway::lifecycle::GatewaySession;
use crate::remote::{RedactedTarget, RemoteConnector, Target};
use crate::util::round2;
use crate::AppState;

/// Request body for `POST /api/ssh/test`.
#[derive(Deserialize)]
pub struct CommandTestRequest {
    pub node: Target,
    /// Commands joined with newlines and run as a single remote script.
    #[serde(default)]
    pub cmds: Vec<String>,
}

/// Response body for `POST /api/ssh/test`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandTestResult {
    /// Wall-clock seconds, two decimals.
    pub time_elapsed: f64,
    /// Connected, ran the script, and the script exited 0.
    pub success: bool,
    /// stdout, one entry per line.
    pub output: Vec<String>,
    /// stderr lines, or the connection failure.
    pub error: Vec<String>,
    /// The node as received, with `auth_value` masked.
    pub node: RedactedTarget,
    /// The combined script that was run.
    pub cmds: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// `POST /api/ssh/test` — run commands on a node.
pub async fn ssh_test(
    State(state): State<AppState>,
    Json(payload): Json<CommandTestRequest>,
) -> Json<CommandTestResult> {
    let timeout = state.config.ssh.connect_timeout();
    Json(run_commands(Arc::clone(&state.connector), payload, timeout).await)
}

pub async fn run_commands<C: RemoteConnector>(
    connector: Arc<C>,
    request: CommandTestRequest,
    timeout: Duration,
) -> CommandTestResult {
    let started = Instant::now();
    let CommandTestRequest { node, cmds } = request;
    let redacted = node.redacted();
    let script = cmds.join("\n");
    info!("ssh test: {} command(s) on {node}", cmds.len());

    let mut session = GatewaySession::<C::Session>::new();
    let outcome = async {
        session.authenticate(&connector, node, timeout).await?;
        session.activate();
        session.exec(script.clone()).await
    }
    .await;
    session.close().await;

    let (success, output, error, exit_code) = match outcome {
        Ok(out) => (
            out.exit_code == 0,
            lines(&out.stdout),
            lines(&out.stderr),
            Some(out.exit_code),
        ),
        Err(e) => {
            warn!("ssh test on {}:{} failed: {e}", redacted.host, redacted.port);
            (false, Vec::new(), vec![e.to_string()], None)
        }
    };

    CommandTestResult {
        time_elapsed: round2(started.elapsed().as_secs_f64()),
        success,
        output,
        error,
        node: redacted,
        cmds: script,
        exit_code,
    }
}

fn lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_owned).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::{self, MockConnector};
    use crate::remote::ExecOutput;

    fn request(cmds: &[&str]) -> CommandTestRequest {
        CommandTestRequest {
            node: mock::target(),
            cmds: cmds.iter().map(ToString::to_string).collect(),
        }
    }

    #[tokio::test]
    async fn test_commands_run_as_one_script() {
        let connector = Arc::new(MockConnector {
            exec_output: ExecOutput {
                stdout: "hi\nthere\n".into(),
                stderr: String::new(),
                exit_code: 0,
            },
            ..MockConnector::default()
        });
        let result = run_commands(
            Arc::clone(&connector),
            request(&["echo hi", "echo there"]),
            Duration::from_secs(1),
        )
        .await;

        assert!(result.success);
        assert_eq!(result.output, vec!["hi", "there"]);
        assert!(result.error.is_empty());
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.node.auth_value, "***");
        assert_eq!(result.cmds, "echo hi\necho there");
        assert_eq!(
            connector.log.matching("exec"),
            vec!["exec echo hi\necho there"]
        );
        assert_eq!(connector.log.matching("close"), vec!["close session"]);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let connector = Arc::new(MockConnector {
            exec_output: ExecOutput {
                stdout: String::new(),
                stderr: "ls: /nope: No such file\n".into(),
                exit_code: 2,
            },
            ..MockConnector::default()
        });
        let result = run_commands(connector, request(&["ls /nope"]), Duration::from_secs(1)).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(2));
        assert_eq!(result.error, vec!["ls: /nope: No such file"]);
    }

    #[tokio::test]
    async fn test_auth_failure_reported_in_body() {
        let connector = Arc::new(MockConnector::rejecting("bad password"));
        let result = run_commands(
            Arc::clone(&connector),
            request(&["uptime"]),
            Duration::from_secs(1),
        )
        .await;

        assert!(!result.success);
        assert!(result.output.is_empty());
        assert_eq!(result.error, vec!["authentication failed: bad password"]);
        assert!(result.exit_code.is_none());
        assert!(connector.log.matching("exec").is_empty());

        let body = serde_json::to_string(&result).unwrap();
        assert!(!body.contains("secret"));
    }
}
