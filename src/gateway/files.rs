//! File operation pipeline.
//!
//! Requests are handled strictly one at a time, in arrival order: the next
//! request is not read until the previous one's last response frame is
//! sent. A failing operation is answered with `success=false` and the
//! pipeline keeps going. Only a broken transport, an undecodable request or
//! a failed worker ends the session.

use std::fmt::Display;
use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use futures::{Sink, Stream};
use tracing::{debug, info};

use super::lifecycle::GatewaySession;
use super::offload::Handle;
use super::protocol::{
    DownloadComplete, DownloadMetadata, FileOperation, FileRequest, FileResult, ServerMessage,
};
use super::{
    next_frame, read_target, send_frame, send_json, teardown, ErrorReport, Frame, SessionSummary,
};
use crate::config::Config;
use crate::error::{GatewayError, GatewayResult};
use crate::remote::{FileSession, RemoteConnector};
use crate::util;

#[derive(Debug, Clone)]
pub struct FileSettings {
    pub chunk_size: usize,
    pub max_upload_size: usize,
    pub connect_timeout: Duration,
}

impl FileSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.transfer.chunk_size.max(1),
            max_upload_size: config.transfer.max_upload_size,
            connect_timeout: config.ssh.connect_timeout(),
        }
    }
}

/// Run one file session to completion.
pub async fn run<C, Si, St, E>(
    connector: Arc<C>,
    settings: FileSettings,
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
    let mut served = 0;
    let result = serve(
        &mut session,
        &connector,
        &settings,
        &mut sink,
        &mut stream,
        &mut served,
    )
    .await;
    teardown(&mut session, &mut sink, result, served, ErrorReport::Always).await
}

async fn serve<C, Si, St, E>(
    session: &mut GatewaySession<C::Session>,
    connector: &Arc<C>,
    settings: &FileSettings,
    sink: &mut Si,
    stream: &mut St,
    served: &mut u64,
) -> GatewayResult<()>
where
    C: RemoteConnector,
    Si: Sink<Frame> + Unpin,
    Si::Error: Display,
    St: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    let target = read_target(stream).await?;
    info!("file session {}: connecting to {target}", session.id());
    session
        .authenticate(connector, target, settings.connect_timeout)
        .await?;
    let files = session.open_files().await?;
    session.activate();

    let mut pipeline = Pipeline {
        files,
        settings,
        sink,
        stream,
    };
    loop {
        let request = pipeline.next_request().await?;
        pipeline.handle(request).await?;
        *served += 1;
    }
}

struct Pipeline<'a, F, Si, St> {
    files: Handle<F>,
    settings: &'a FileSettings,
    sink: &'a mut Si,
    stream: &'a mut St,
}

impl<F, Si, St, E> Pipeline<'_, F, Si, St>
where
    F: FileSession,
    Si: Sink<Frame> + Unpin,
    Si::Error: Display,
    St: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    async fn next_request(&mut self) -> GatewayResult<FileRequest> {
        match next_frame(self.stream).await? {
            Frame::Text(text) => Ok(serde_json::from_str(&text)?),
            _ => Err(GatewayError::ProtocolDecode(
                "expected a JSON file request".into(),
            )),
        }
    }

    async fn send(&mut self, message: &ServerMessage) -> GatewayResult<()> {
        send_json(self.sink, message).await
    }

    async fn handle(&mut self, request: FileRequest) -> GatewayResult<()> {
        let operation = request.operation.clone();
        let path = request.remote_path.clone();
        let outcome = match request.operation.parse::<FileOperation>() {
            Ok(op) => self.execute(op, request).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(Some(result)) => self.send(&ServerMessage::Result(result)).await,
            Ok(None) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!("{operation} {path}: {e}");
                self.send(&ServerMessage::Result(FileResult::failed(
                    &operation, &path, &e,
                )))
                .await
            }
        }
    }

    /// `Ok(None)` when the operation already streamed its own responses.
    async fn execute(
        &mut self,
        op: FileOperation,
        request: FileRequest,
    ) -> GatewayResult<Option<FileResult>> {
        if op == FileOperation::Upload {
            return self.upload(request).await.map(Some);
        }
        let path = required_path(&request)?;
        match op {
            FileOperation::List => {
                let dir = path.clone();
                let items = self.files.call("list", move |fs| fs.list(&dir)).await?;
                let message = format!("{} entries", items.len());
                Ok(Some(
                    FileResult::ok(op, &path, message).with_items(items),
                ))
            }
            FileOperation::Mkdir => {
                let dir = path.clone();
                self.files
                    .call("mkdir", move |fs| make_dirs(fs, &dir))
                    .await?;
                Ok(Some(FileResult::ok(op, &path, "directory created")))
            }
            FileOperation::Delete => {
                let target = path.clone();
                let removed = self
                    .files
                    .call("delete", move |fs| delete(fs, &target))
                    .await?;
                Ok(Some(FileResult::ok(op, &path, format!("{removed} deleted"))))
            }
            FileOperation::Rename => {
                let to = request
                    .new_path
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| GatewayError::remote("new_path is required"))?;
                let (from, dest) = (path.clone(), to.clone());
                self.files
                    .call("rename", move |fs| {
                        if let Some(parent) = util::parent(&dest) {
                            make_dirs(fs, &parent)?;
                        }
                        fs.rename(&from, &dest)
                    })
                    .await?;
                Ok(Some(FileResult::ok(op, &path, format!("moved to {to}"))))
            }
            FileOperation::Download => {
                self.download(path).await?;
                Ok(None)
            }
            FileOperation::Upload => unreachable!("handled above"),
        }
    }

    /// Metadata, then the content in binary chunks, then a completion marker.
    async fn download(&mut self, path: String) -> GatewayResult<()> {
        let stat_path = path.clone();
        let stat = self
            .files
            .call("stat", move |fs| fs.stat(&stat_path))
            .await?
            .ok_or_else(|| GatewayError::RemoteOperation(format!("{path}: no such file")))?;
        if stat.is_directory {
            return Err(GatewayError::RemoteOperation(format!(
                "{path}: is a directory"
            )));
        }

        let open_path = path.clone();
        let reader = self
            .files
            .call("open", move |fs| fs.open_read(&open_path))
            .await?;
        let reader = Handle::new(reader);

        self.send(&ServerMessage::DownloadMetadata(DownloadMetadata {
            remote_path: path.clone(),
            filename: util::basename(&path),
            size: stat.size,
        }))
        .await?;

        let chunk_size = self.settings.chunk_size;
        let mut sent = 0u64;
        loop {
            let chunk = reader
                .call("read", move |r| read_chunk(r, chunk_size))
                .await?;
            if chunk.is_empty() {
                break;
            }
            sent += chunk.len() as u64;
            send_frame(self.sink, Frame::Binary(chunk)).await?;
            tokio::task::yield_now().await;
        }

        self.send(&ServerMessage::DownloadComplete(DownloadComplete {
            remote_path: path,
            size: sent,
            success: true,
        }))
        .await
    }

    async fn upload(&mut self, request: FileRequest) -> GatewayResult<FileResult> {
        // Consume the payload frame first so a rejected upload leaves the
        // stream positioned at the next request.
        let payload = match &request.content {
            Some(content) => decode_inline(content.clone(), request.encoding.as_deref())?,
            None => self.read_payload().await?,
        };
        let path = required_path(&request)?;
        if payload.len() > self.settings.max_upload_size {
            return Err(GatewayError::RemoteOperation(format!(
                "payload of {} bytes exceeds the {} byte limit",
                payload.len(),
                self.settings.max_upload_size
            )));
        }

        let dest = path.clone();
        let written = self
            .files
            .call("upload", move |fs| {
                if let Some(parent) = util::parent(&dest) {
                    make_dirs(fs, &parent)?;
                }
                fs.write_file(&dest, &payload)
            })
            .await?;
        Ok(FileResult::ok(FileOperation::Upload, &path, "uploaded").with_size(written))
    }

    async fn read_payload(&mut self) -> GatewayResult<Vec<u8>> {
        match next_frame(self.stream).await? {
            Frame::Binary(bytes) => Ok(bytes),
            _ => Err(GatewayError::ProtocolDecode(
                "expected a binary upload payload".into(),
            )),
        }
    }
}

fn required_path(request: &FileRequest) -> GatewayResult<String> {
    if request.remote_path.is_empty() {
        Err(GatewayError::remote("remote_path is required"))
    } else {
        Ok(request.remote_path.clone())
    }
}

fn decode_inline(content: String, encoding: Option<&str>) -> GatewayResult<Vec<u8>> {
    match encoding {
        Some("base64") => base64::engine::general_purpose::STANDARD
            .decode(content.as_bytes())
            .map_err(|e| GatewayError::remote(format!("invalid base64 content: {e}"))),
        _ => Ok(content.into_bytes()),
    }
}

/// Create `path` and any missing ancestors. Succeeds when the directory
/// already exists, including when another client creates it mid-walk.
pub(crate) fn make_dirs<F: FileSession + ?Sized>(fs: &mut F, path: &str) -> GatewayResult<()> {
    for dir in util::ancestors(path) {
        match fs.stat(&dir)? {
            Some(stat) if stat.is_directory => continue,
            Some(_) => {
                return Err(GatewayError::RemoteOperation(format!(
                    "{dir}: exists and is not a directory"
                )))
            }
            None => {}
        }
        if let Err(e) = fs.mkdir(&dir) {
            match fs.stat(&dir)? {
                Some(stat) if stat.is_directory => {}
                _ => return Err(e),
            }
        }
    }
    Ok(())
}

/// Remove a file or an empty directory. Returns what was removed.
pub(crate) fn delete<F: FileSession + ?Sized>(fs: &mut F, path: &str) -> GatewayResult<&'static str> {
    match fs.stat(path)? {
        None => Err(GatewayError::RemoteOperation(format!(
            "{path}: no such file"
        ))),
        Some(stat) if stat.is_directory => fs.remove_dir(path).map(|()| "directory"),
        Some(_) => fs.remove_file(path).map(|()| "file"),
    }
}

/// Fill up to `size` bytes. Empty at end of file.
fn read_chunk<R: Read>(reader: &mut R, size: usize) -> GatewayResult<Vec<u8>> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(GatewayError::remote(e)),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}
