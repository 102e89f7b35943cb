use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::uploaders::{ImageHost, UploadResult};

/// Stable identifier of a movie in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct MovieId(pub Uuid);

impl MovieId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MovieId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MovieId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Processing state of a movie, in forward order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MovieState {
    /// Added, not yet picked up by a run
    Pending,
    /// Metadata is being probed
    AnalyzingMedia,
    /// Waiting for a generation slot
    WaitingForScreenshotSlot,
    /// Thumbnail grid and screenshots are being generated
    GeneratingScreenshots,
    /// Waiting for an upload slot
    WaitingForUploadSlot,
    /// Artifacts are being uploaded
    UploadingScreenshots,
    Completed,
    Error,
}

impl MovieState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MovieState::Completed | MovieState::Error)
    }

    fn rank(self) -> u8 {
        match self {
            MovieState::Pending => 0,
            MovieState::AnalyzingMedia => 1,
            MovieState::WaitingForScreenshotSlot => 2,
            MovieState::GeneratingScreenshots => 3,
            MovieState::WaitingForUploadSlot => 4,
            MovieState::UploadingScreenshots => 5,
            MovieState::Completed => 6,
            MovieState::Error => 7,
        }
    }

    /// Forward moves only, `Error` from any non-terminal state, and the
    /// cancellation reset back to `Pending`.
    pub fn is_valid_transition(from: MovieState, to: MovieState) -> bool {
        if from.is_terminal() {
            return false;
        }

        match to {
            MovieState::Error => true,
            MovieState::Pending => from != MovieState::Pending,
            _ => to.rank() > from.rank(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MovieState::Pending => "pending",
            MovieState::AnalyzingMedia => "analyzing_media",
            MovieState::WaitingForScreenshotSlot => "waiting_for_screenshot_slot",
            MovieState::GeneratingScreenshots => "generating_screenshots",
            MovieState::WaitingForUploadSlot => "waiting_for_upload_slot",
            MovieState::UploadingScreenshots => "uploading_screenshots",
            MovieState::Completed => "completed",
            MovieState::Error => "error",
        }
    }
}

impl std::fmt::Display for MovieState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat key/value maps as reported by a media prober
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ProbeOutput {
    pub general: HashMap<String, String>,
    pub video: HashMap<String, String>,
    pub audio: HashMap<String, String>,
}

/// Metadata derived from a probe
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    /// Bit rates in bits/second
    pub overall_bitrate: u64,
    pub video_bitrate: u64,
    pub audio_bitrate: u64,
    pub video_codec: String,
    pub audio_codec: String,
    pub frame_rate: f64,
    /// `general.<key>`, `video.<key>`, `audio.<key>` lookup table for templates
    pub placeholders: BTreeMap<String, String>,
}

impl MediaInfo {
    pub fn from_probe(probe: &ProbeOutput) -> Self {
        let number = |map: &HashMap<String, String>, key: &str| -> Option<f64> {
            map.get(key).and_then(|v| v.trim().parse::<f64>().ok())
        };
        let text = |map: &HashMap<String, String>, key: &str| -> String {
            map.get(key).cloned().unwrap_or_default()
        };

        let duration = number(&probe.general, "duration")
            .or_else(|| number(&probe.video, "duration"))
            .unwrap_or(0.0);

        let frame_rate = probe.video.get("r_frame_rate")
            .or_else(|| probe.video.get("avg_frame_rate"))
            .and_then(|v| parse_frame_rate(v))
            .unwrap_or(0.0);

        let mut placeholders = BTreeMap::new();
        for (section, map) in [("general", &probe.general), ("video", &probe.video), ("audio", &probe.audio)] {
            for (key, value) in map {
                placeholders.insert(format!("{}.{}", section, key.to_lowercase()), value.clone());
            }
        }

        Self {
            duration,
            width: number(&probe.video, "width").unwrap_or(0.0) as u32,
            height: number(&probe.video, "height").unwrap_or(0.0) as u32,
            overall_bitrate: number(&probe.general, "bit_rate").unwrap_or(0.0) as u64,
            video_bitrate: number(&probe.video, "bit_rate").unwrap_or(0.0) as u64,
            audio_bitrate: number(&probe.audio, "bit_rate").unwrap_or(0.0) as u64,
            video_codec: text(&probe.video, "codec_name"),
            audio_codec: text(&probe.audio, "codec_name"),
            frame_rate,
            placeholders,
        }
    }
}

/// "30000/1001" or "25"
fn parse_frame_rate(value: &str) -> Option<f64> {
    match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 { None } else { Some(num / den) }
        }
        None => value.trim().parse().ok(),
    }
}

/// Everything one host produced for a movie
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct HostUploads {
    pub thumbnail: Option<UploadResult>,
    pub screenshots: Vec<UploadResult>,
    pub album_url: Option<String>,
}

impl HostUploads {
    pub fn is_empty(&self) -> bool {
        self.thumbnail.is_none() && self.screenshots.is_empty()
    }

    /// Grid thumbnail linking to its viewer page
    pub fn thumbnail_link(&self) -> Option<&str> {
        self.thumbnail.as_ref()
            .map(|t| t.bbcode.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Full-size grid image, for hosts that expose a direct link
    pub fn big_thumbnail_link(&self) -> Option<String> {
        let thumb = self.thumbnail.as_ref()?;
        if thumb.direct_url.is_empty() {
            return None;
        }
        if thumb.viewer_url.is_empty() {
            Some(format!("[img]{}[/img]", thumb.direct_url))
        } else {
            Some(format!("[url={}][img]{}[/img][/url]", thumb.viewer_url, thumb.direct_url))
        }
    }
}

/// One ingested video file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movie {
    pub id: MovieId,
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub media: Option<MediaInfo>,
    pub state: MovieState,
    pub error: Option<String>,
    /// Non-fatal failures of single screenshots or uploads
    pub artifact_errors: Vec<String>,
    pub uploads: BTreeMap<ImageHost, HostUploads>,
    pub uploaded_to: Option<ImageHost>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Movie {
    pub fn new(path: impl AsRef<Path>, size: u64) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        Self {
            id: MovieId::new(),
            path,
            name,
            size,
            media: None,
            state: MovieState::Pending,
            error: None,
            artifact_errors: Vec::new(),
            uploads: BTreeMap::new(),
            uploaded_to: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Moves to `to` when the transition is legal; returns whether it moved.
    pub fn transition(&mut self, to: MovieState) -> bool {
        if !MovieState::is_valid_transition(self.state, to) {
            return false;
        }

        match to {
            MovieState::AnalyzingMedia => {
                self.started_at = Some(Utc::now());
            }
            MovieState::Completed | MovieState::Error => {
                self.finished_at = Some(Utc::now());
            }
            _ => {}
        }
        self.state = to;
        true
    }

    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.transition(MovieState::Error) {
            self.error = Some(message.into());
            true
        } else {
            false
        }
    }

    /// Drops everything a partial run produced.
    pub fn reset_to_pending(&mut self) {
        self.state = MovieState::Pending;
        self.error = None;
        self.artifact_errors.clear();
        self.media = None;
        self.uploads.clear();
        self.uploaded_to = None;
        self.started_at = None;
        self.finished_at = None;
    }

    /// Uploads for `host`, or for the host this movie was uploaded to.
    pub fn uploads_for(&self, host: Option<ImageHost>) -> Option<&HostUploads> {
        let host = host.or(self.uploaded_to)?;
        self.uploads.get(&host)
    }
}

/// Published after every store mutation
#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    pub processing: bool,
    pub movies: Vec<Movie>,
}

// Movies and snapshots cross task boundaries
const _: () = {
    fn assert_send<T: Send + Sync>() {}
    fn assert_types() {
        assert_send::<Movie>();
        assert_send::<StoreSnapshot>();
    }
};
