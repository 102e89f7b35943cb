use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use crate::core::{Error, Result};
use crate::uploaders::ImageHost;

pub const DEFAULT_TEMPLATE: &str = "\
[b]%FILE_NAME%[/b]
Size: %FILE_SIZE% | Duration: %DURATION% | Resolution: %RESOLUTION%
Video: %VIDEO_CODEC% @ %VIDEO_BITRATE% | Audio: %AUDIO_CODEC% @ %AUDIO_BITRATE%

%THUMBNAIL%

%SCREENSHOTS_INLINE%
";

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub hosts: HostsConfig,
    /// Output template; falls back to [`DEFAULT_TEMPLATE`]
    pub template: Option<String>,
    pub log_level: Option<String>,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<AppConfig> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("can't read {}: {}", path.display(), err)))?;
        AppConfig::parse(&config_str)
    }

    pub fn parse(config_str: &str) -> Result<AppConfig> {
        let config: AppConfig = toml::from_str(config_str)
            .map_err(|err| Error::Config(err.to_string()))?;
        config.pipeline.validate()?;
        Ok(config)
    }

    pub fn template(&self) -> &str {
        self.template.as_deref().unwrap_or(DEFAULT_TEMPLATE)
    }
}

/// Upper bound for `PipelineConfig::upload_retries`
pub const MAX_UPLOAD_RETRIES: u32 = 10;

/// Settings for one processing run
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_concurrent_screenshots: usize,
    pub max_concurrent_uploads: usize,
    pub screenshot_count: usize,
    /// ffmpeg `-q:v` scale, 2 (best) to 31
    pub screenshot_quality: u8,
    pub generate_thumbnail: bool,
    pub host: ImageHost,
    pub work_dir: PathBuf,
    pub keep_artifacts: bool,
    pub upload_retries: u32,
    pub request_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_screenshots: 2,
            max_concurrent_uploads: 2,
            screenshot_count: 4,
            screenshot_quality: 2,
            generate_thumbnail: true,
            host: ImageHost::Imgbox,
            work_dir: std::env::temp_dir().join("reelshot"),
            keep_artifacts: false,
            upload_retries: 2,
            request_timeout_secs: 120,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_screenshots == 0 || self.max_concurrent_uploads == 0 {
            return Err(Error::Config("concurrency limits must be at least 1".to_string()));
        }
        if !(1..=31).contains(&self.screenshot_quality) {
            return Err(Error::Config("screenshot_quality must be between 1 and 31".to_string()));
        }
        if self.upload_retries > MAX_UPLOAD_RETRIES {
            return Err(Error::Config(format!("upload_retries must be at most {}", MAX_UPLOAD_RETRIES)));
        }
        if self.screenshot_count == 0 && !self.generate_thumbnail {
            return Err(Error::Config("nothing to generate: screenshot_count is 0 and thumbnails are off".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct HostsConfig {
    pub imagebam: HostSettings,
    pub freeimage: HostSettings,
    pub imgbox: HostSettings,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct HostSettings {
    /// Overrides the public endpoint
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Previously issued session cookie value to reuse
    pub session_cookie: Option<String>,
}
