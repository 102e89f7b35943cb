//! Single-frame capture with ffmpeg.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use tracing::debug;
use crate::core::{Error, Result, ScreenshotGenerator};
use crate::utils::format_timestamp;
use super::command::{locate, run, stderr_tail};

pub struct FfmpegScreenshotter {
    program: PathBuf,
}

impl FfmpegScreenshotter {
    /// Fails with `ToolMissing` when ffmpeg is not on PATH.
    pub fn new() -> Result<Self> {
        Ok(Self { program: locate("ffmpeg")? })
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }
}

/// Input seeking (`-ss` before `-i`) keeps capture time flat for long files.
fn capture_args(path: &Path, output: &Path, timestamp: f64, quality: u8) -> Vec<OsString> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-ss".into(),
        format_timestamp(timestamp).into(),
        "-i".into(),
        path.as_os_str().to_owned(),
        "-frames:v".into(),
        "1".into(),
        "-q:v".into(),
        quality.clamp(1, 31).to_string().into(),
        "-y".into(),
        output.as_os_str().to_owned(),
    ]
}

#[async_trait]
impl ScreenshotGenerator for FfmpegScreenshotter {
    async fn capture(&self, path: &Path, output: &Path, timestamp: f64, quality: u8) -> Result<()> {
        debug!(input = %path.display(), timestamp, "Capturing frame");
        let result = run(&self.program, capture_args(path, output, timestamp, quality)).await?;

        if !result.status.success() {
            return Err(Error::Generation(format!(
                "ffmpeg failed at {}: {}",
                format_timestamp(timestamp),
                stderr_tail(&result)
            )));
        }

        // ffmpeg exits 0 without writing anything when seeking past the end
        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(Error::Generation(format!(
                "ffmpeg produced no frame at {}",
                format_timestamp(timestamp)
            ))),
        }
    }
}
