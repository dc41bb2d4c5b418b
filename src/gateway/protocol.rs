//! File channel wire types.
//!
//! Client → server: one JSON [`FileRequest`] per operation. An upload
//! without inline `content` is followed by exactly one binary frame holding
//! the payload.
//!
//! Server → client, all tagged by `type`:
//!
//! | Type                | Fields                                                     |
//! |---------------------|------------------------------------------------------------|
//! | `result`            | `operation`, `remote_path`, `success`, `message`, `items?`, `size?` |
//! | `download_metadata` | `remote_path`, `filename`, `size`                          |
//! | `download_complete` | `remote_path`, `size`, `success`                           |
//! | `error`             | `code`, `message`, `success` (session-ending)              |
//!
//! A download answers with `download_metadata`, then zero or more binary
//! frames, then `download_complete`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::remote::FileItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    Upload,
    Download,
    Delete,
    List,
    Mkdir,
    Rename,
}

impl FileOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Mkdir => "mkdir",
            Self::Rename => "rename",
        }
    }
}

impl FromStr for FileOperation {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(Self::Upload),
            "download" => Ok(Self::Download),
            "delete" => Ok(Self::Delete),
            "list" => Ok(Self::List),
            "mkdir" => Ok(Self::Mkdir),
            "rename" | "move" => Ok(Self::Rename),
            other => Err(GatewayError::UnsupportedOperation(other.to_string())),
        }
    }
}

/// One client request. `operation` stays a string so an unknown tag is a
/// per-request failure rather than a decode error.
#[derive(Debug, Clone, Deserialize)]
pub struct FileRequest {
    pub operation: String,
    #[serde(default, alias = "path")]
    pub remote_path: String,
    #[serde(default)]
    pub new_path: Option<String>,
    /// Inline upload payload, used instead of a binary frame.
    #[serde(default)]
    pub content: Option<String>,
    /// `"base64"` to decode `content`; anything else means UTF-8 text.
    #[serde(default)]
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub operation: String,
    pub remote_path: String,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<FileItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl FileResult {
    pub fn ok(operation: FileOperation, remote_path: &str, message: impl Into<String>) -> Self {
        Self {
            operation: operation.as_str().to_string(),
            remote_path: remote_path.to_string(),
            success: true,
            message: message.into(),
            items: None,
            size: None,
        }
    }

    pub fn failed(operation: &str, remote_path: &str, error: &GatewayError) -> Self {
        Self {
            operation: operation.to_string(),
            remote_path: remote_path.to_string(),
            success: false,
            message: error.to_string(),
            items: None,
            size: None,
        }
    }

    #[must_use]
    pub fn with_items(mut self, items: Vec<FileItem>) -> Self {
        self.items = Some(items);
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadMetadata {
    pub remote_path: String,
    pub filename: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadComplete {
    pub remote_path: String,
    pub size: u64,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Result(FileResult),
    DownloadMetadata(DownloadMetadata),
    DownloadComplete(DownloadComplete),
}
