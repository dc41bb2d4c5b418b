//! libssh2-backed implementation of the remote collaborator traits.
//!
//! Every method here blocks on the network. The interactive shell switches
//! the session to non-blocking mode so [`PollableSource::try_read`] can
//! return [`Readiness::Idle`] instead of waiting; writes on that channel spin
//! on `WouldBlock` with a short sleep.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use ssh2::{Channel, ErrorCode, File, Session, Sftp};
use tracing::debug;

use super::{
    AuthType, ExecOutput, FileItem, FileSession, FileStat, PollableSource, Readiness,
    RemoteConnector, RemoteSession, ShellChannel, Target, TerminalSpec,
};
use crate::error::{GatewayError, GatewayResult};

/// Pause between write attempts while the channel window is full.
const WRITE_RETRY: Duration = Duration::from_millis(5);

/// SFTP status codes meaning "path does not exist".
const FX_NO_SUCH_FILE: i32 = 2;
const FX_NO_SUCH_PATH: i32 = 10;

/// Mode for directories created by the gateway.
const DIR_MODE: i32 = 0o755;

fn auth_err(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::Authentication(e.to_string())
}

fn is_not_found(e: &ssh2::Error) -> bool {
    matches!(e.code(), ErrorCode::SFTP(FX_NO_SUCH_FILE | FX_NO_SUCH_PATH))
}

/// Opens authenticated libssh2 sessions. Host keys are accepted without
/// verification, matching the trust model of the browser client.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

impl RemoteConnector for SshConnector {
    type Session = SshSession;

    fn connect(&self, target: &Target, timeout: Duration) -> GatewayResult<SshSession> {
        target.validate()?;

        let addrs = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|e| auth_err(format!("cannot resolve {}: {e}", target.host)))?;
        let mut last_err = None;
        let mut tcp = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let tcp = tcp.ok_or_else(|| match last_err {
            Some(e) => auth_err(format!("cannot connect to {target}: {e}")),
            None => auth_err(format!("no address for {}", target.host)),
        })?;

        let mut session = Session::new().map_err(auth_err)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout.as_millis().min(u128::from(u32::MAX)) as u32);
        session.handshake().map_err(auth_err)?;

        match target.auth_type {
            AuthType::Password => session.userauth_password(&target.username, &target.auth_value),
            AuthType::Key => {
                session.userauth_pubkey_memory(&target.username, None, &target.auth_value, None)
            }
        }
        .map_err(auth_err)?;

        if !session.authenticated() {
            return Err(auth_err("server rejected the credentials"));
        }

        // No timeout on an established session.
        session.set_timeout(0);
        debug!("ssh: authenticated to {target}");
        Ok(SshSession {
            session,
            closed: false,
        })
    }
}

/// An authenticated libssh2 session.
pub struct SshSession {
    session: Session,
    closed: bool,
}

impl RemoteSession for SshSession {
    type Shell = SshShell;
    type Files = SshFiles;

    fn open_shell(&mut self, spec: &TerminalSpec) -> GatewayResult<SshShell> {
        let mut channel = self.session.channel_session().map_err(GatewayError::remote)?;
        channel
            .request_pty(
                &spec.term,
                None,
                Some((u32::from(spec.cols), u32::from(spec.rows), 0, 0)),
            )
            .map_err(GatewayError::remote)?;
        channel.shell().map_err(GatewayError::remote)?;
        self.session.set_blocking(false);
        Ok(SshShell {
            channel,
            session: self.session.clone(),
            closed: false,
        })
    }

    fn open_file_session(&mut self) -> GatewayResult<SshFiles> {
        let sftp = self.session.sftp().map_err(GatewayError::remote)?;
        Ok(SshFiles { sftp: Some(sftp) })
    }

    fn exec(&mut self, script: &str) -> GatewayResult<ExecOutput> {
        let mut channel = self.session.channel_session().map_err(GatewayError::remote)?;
        channel.exec(script).map_err(GatewayError::remote)?;

        let mut stdout = Vec::new();
        channel
            .read_to_end(&mut stdout)
            .map_err(GatewayError::remote)?;
        let mut stderr = Vec::new();
        channel
            .stderr()
            .read_to_end(&mut stderr)
            .map_err(GatewayError::remote)?;
        channel.wait_close().map_err(GatewayError::remote)?;
        let exit_code = channel.exit_status().map_err(GatewayError::remote)?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.session.set_blocking(true);
        if let Err(e) = self.session.disconnect(None, "session closed", None) {
            debug!("ssh: disconnect failed: {e}");
        }
    }
}

/// Interactive shell channel in non-blocking mode.
pub struct SshShell {
    channel: Channel,
    session: Session,
    closed: bool,
}

impl PollableSource for SshShell {
    fn try_read(&mut self, buf: &mut [u8]) -> GatewayResult<Readiness> {
        match self.channel.read(buf) {
            Ok(0) if self.channel.eof() => Ok(Readiness::Eof),
            Ok(0) => Ok(Readiness::Idle),
            Ok(n) => Ok(Readiness::Ready(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if self.channel.eof() {
                    Ok(Readiness::Eof)
                } else {
                    Ok(Readiness::Idle)
                }
            }
            Err(e) => Err(GatewayError::remote(e)),
        }
    }
}

impl ShellChannel for SshShell {
    fn write_all(&mut self, data: &[u8]) -> GatewayResult<()> {
        let mut rest = data;
        while !rest.is_empty() {
            match self.channel.write(rest) {
                Ok(0) => return Err(GatewayError::remote("shell channel closed")),
                Ok(n) => rest = &rest[n..],
                Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(WRITE_RETRY),
                Err(e) => return Err(GatewayError::remote(e)),
            }
        }
        loop {
            match self.channel.flush() {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(WRITE_RETRY),
                Err(e) => return Err(GatewayError::remote(e)),
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.session.set_blocking(true);
        if let Err(e) = self.channel.close() {
            debug!("ssh: channel close failed: {e}");
        }
    }
}

/// SFTP session. `None` once closed.
pub struct SshFiles {
    sftp: Option<Sftp>,
}

impl SshFiles {
    fn sftp(&self) -> GatewayResult<&Sftp> {
        self.sftp
            .as_ref()
            .ok_or_else(|| GatewayError::remote("file session is closed"))
    }
}

fn convert_stat(stat: &ssh2::FileStat) -> FileStat {
    FileStat {
        size: stat.size.unwrap_or(0),
        permissions: stat.perm.unwrap_or(0),
        is_directory: stat.is_dir(),
        modified_time: stat.mtime,
    }
}

fn with_path(path: &str, e: impl std::fmt::Display) -> GatewayError {
    GatewayError::RemoteOperation(format!("{path}: {e}"))
}

impl FileSession for SshFiles {
    type Reader = File;

    fn list(&mut self, path: &str) -> GatewayResult<Vec<FileItem>> {
        let entries = self
            .sftp()?
            .readdir(Path::new(path))
            .map_err(|e| with_path(path, e))?;
        Ok(entries
            .iter()
            .filter_map(|(entry, stat)| {
                let name = entry.file_name()?.to_string_lossy().into_owned();
                if name == "." || name == ".." {
                    return None;
                }
                Some(FileItem::new(name, &convert_stat(stat)))
            })
            .collect())
    }

    fn stat(&mut self, path: &str) -> GatewayResult<Option<FileStat>> {
        match self.sftp()?.stat(Path::new(path)) {
            Ok(stat) => Ok(Some(convert_stat(&stat))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(with_path(path, e)),
        }
    }

    fn mkdir(&mut self, path: &str) -> GatewayResult<()> {
        self.sftp()?
            .mkdir(Path::new(path), DIR_MODE)
            .map_err(|e| with_path(path, e))
    }

    fn rename(&mut self, from: &str, to: &str) -> GatewayResult<()> {
        self.sftp()?
            .rename(Path::new(from), Path::new(to), None)
            .map_err(|e| with_path(from, e))
    }

    fn remove_file(&mut self, path: &str) -> GatewayResult<()> {
        self.sftp()?
            .unlink(Path::new(path))
            .map_err(|e| with_path(path, e))
    }

    fn remove_dir(&mut self, path: &str) -> GatewayResult<()> {
        self.sftp()?
            .rmdir(Path::new(path))
            .map_err(|e| with_path(path, e))
    }

    fn open_read(&mut self, path: &str) -> GatewayResult<File> {
        self.sftp()?
            .open(Path::new(path))
            .map_err(|e| with_path(path, e))
    }

    fn write_file(&mut self, path: &str, data: &[u8]) -> GatewayResult<u64> {
        let mut file = self
            .sftp()?
            .create(Path::new(path))
            .map_err(|e| with_path(path, e))?;
        file.write_all(data).map_err(|e| with_path(path, e))?;
        Ok(data.len() as u64)
    }

    fn close(&mut self) {
        self.sftp = None;
    }
}
