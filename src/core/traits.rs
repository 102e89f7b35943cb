use std::path::{Path, PathBuf};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use crate::uploaders::{ImageHost, UploadResult};
use super::errors::Result;
use super::types::ProbeOutput;

/// Reads technical metadata from a video file
#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<ProbeOutput>;
}

/// Extracts a single JPEG frame
#[async_trait]
pub trait ScreenshotGenerator: Send + Sync {
    /// `quality` follows the ffmpeg `-q:v` scale (2 is best, 31 worst).
    async fn capture(&self, path: &Path, output: &Path, timestamp: f64, quality: u8) -> Result<()>;
}

/// Builds one contact-sheet image for a video.
///
/// Implementations return [`Error::ToolMissing`](super::Error::ToolMissing) when the
/// backing tool is not installed; callers treat that as a skip.
#[async_trait]
pub trait ThumbnailGridGenerator: Send + Sync {
    async fn generate(&self, path: &Path, output_dir: &Path) -> Result<PathBuf>;
}

/// Host-specific upload protocol
#[async_trait]
pub trait UploadClient: Send + Sync {
    fn host(&self) -> ImageHost;

    /// Establishes the host session. Idempotent: only the first successful call
    /// talks to the host.
    async fn ensure_session(&self, cancel: &CancellationToken) -> Result<()>;

    /// Uploads one image. Requires an established session.
    async fn upload_file(
        &self,
        cancel: &CancellationToken,
        file_path: &Path,
        file_name: &str,
    ) -> Result<UploadResult>;

    /// Gallery page collecting this run's uploads, for hosts that make one
    fn album_url(&self) -> Option<String> {
        None
    }
}
