//! File-backed frame source and sink used by the agent CLI.
//!
//! Frames travel through the relay as `data:<mime>;base64,<payload>` URLs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use checkout_common::helpers::{decode_data_url, encode_data_url};
use tracing::{debug, warn};

use crate::error::{AgentError, AgentResult};
use crate::poller::{FrameSink, FrameSource};

pub fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

/// Re-reads an image file on every capture, so an external process can
/// keep overwriting it with the latest camera frame.
pub struct FileFrameSource {
    path: PathBuf,
}

impl FileFrameSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FrameSource for FileFrameSource {
    async fn capture(&self) -> AgentResult<Option<String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(encode_data_url(mime_for(&self.path), &bytes))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(
                AgentError::CameraUnavailable(format!("{} not found", self.path.display())),
            ),
            Err(err) => Err(AgentError::Transport(format!(
                "reading {}: {err}",
                self.path.display()
            ))),
        }
    }
}

/// Writes each relayed frame to a file, replacing the previous one.
pub struct FileFrameSink {
    path: PathBuf,
}

impl FileFrameSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FrameSink for FileFrameSink {
    fn show(&self, image_data: String) {
        let Some((mime, bytes)) = decode_data_url(&image_data) else {
            warn!("discarding frame that is not an image data URL");
            return;
        };
        match std::fs::write(&self.path, &bytes) {
            Ok(()) => debug!("wrote {} byte {} frame to {}", bytes.len(), mime, self.path.display()),
            Err(err) => warn!("failed to write frame to {}: {}", self.path.display(), err),
        }
    }
}

/// Logs frame sizes only.
pub struct LogFrameSink;

impl FrameSink for LogFrameSink {
    fn show(&self, image_data: String) {
        tracing::info!("relayed frame received ({} bytes)", image_data.len());
    }
}
