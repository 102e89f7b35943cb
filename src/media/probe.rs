//! ffprobe metadata.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use crate::core::{Error, MediaProber, ProbeOutput, Result};
use super::command::{locate, run, stderr_tail};

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: serde_json::Map<String, Value>,
    #[serde(default)]
    streams: Vec<serde_json::Map<String, Value>>,
}

pub struct FfprobeProber {
    program: PathBuf,
}

impl FfprobeProber {
    /// Fails with `ToolMissing` when ffprobe is not on PATH.
    pub fn new() -> Result<Self> {
        Ok(Self { program: locate("ffprobe")? })
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<ProbeOutput> {
        let args: [&OsStr; 7] = [
            OsStr::new("-v"),
            OsStr::new("error"),
            OsStr::new("-print_format"),
            OsStr::new("json"),
            OsStr::new("-show_format"),
            OsStr::new("-show_streams"),
            path.as_os_str(),
        ];
        let output = run(&self.program, args).await?;

        if !output.status.success() {
            return Err(Error::Probe(format!("ffprobe failed for {}: {}", path.display(), stderr_tail(&output))));
        }

        parse_ffprobe_json(&output.stdout)
    }
}

/// Flattens ffprobe's JSON into the general/video/audio maps. Only the first
/// video and first audio stream are kept; stream tags are prefixed `tag_`.
pub(crate) fn parse_ffprobe_json(stdout: &[u8]) -> Result<ProbeOutput> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|err| Error::Probe(format!("unreadable ffprobe output: {}", err)))?;

    let video = probe.streams
        .iter()
        .find(|s| s.get("codec_type").and_then(Value::as_str) == Some("video"))
        .ok_or_else(|| Error::Probe("no video stream found".to_string()))?;
    let audio = probe.streams
        .iter()
        .find(|s| s.get("codec_type").and_then(Value::as_str) == Some("audio"));

    Ok(ProbeOutput {
        general: flatten(&probe.format),
        video: flatten(video),
        audio: audio.map(flatten).unwrap_or_default(),
    })
}

fn flatten(map: &serde_json::Map<String, Value>) -> HashMap<String, String> {
    let mut out = HashMap::with_capacity(map.len());
    for (key, value) in map {
        match value {
            Value::Object(tags) if key == "tags" => {
                for (tag, value) in tags {
                    if let Some(text) = scalar(value) {
                        out.insert(format!("tag_{}", tag.to_lowercase()), text);
                    }
                }
            }
            other => {
                if let Some(text) = scalar(other) {
                    out.insert(key.clone(), text);
                }
            }
        }
    }
    out
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MediaInfo;

    const SAMPLE: &str = r#"{
        "streams": [
            {"index":0,"codec_name":"h264","codec_type":"video","width":1920,"height":1080,
             "r_frame_rate":"24000/1001","bit_rate":"4500000","disposition":{"default":1}},
            {"index":1,"codec_name":"aac","codec_type":"audio","channels":2,"bit_rate":"192000",
             "tags":{"language":"eng"}}
        ],
        "format": {"filename":"movie.mkv","format_name":"matroska,webm","duration":"5400.250000",
                   "size":"3221225472","bit_rate":"4772000","tags":{"title":"Movie"}}
    }"#;

    #[test]
    fn test_parse_ffprobe_json() {
        let probe = parse_ffprobe_json(SAMPLE.as_bytes()).unwrap();
        assert_eq!(probe.general.get("format_name").unwrap(), "matroska,webm");
        assert_eq!(probe.general.get("tag_title").unwrap(), "Movie");
        assert_eq!(probe.video.get("width").unwrap(), "1920");
        assert!(!probe.video.contains_key("disposition"));
        assert_eq!(probe.audio.get("tag_language").unwrap(), "eng");

        let info = MediaInfo::from_probe(&probe);
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert_eq!(info.video_codec, "h264");
        assert_eq!(info.audio_bitrate, 192_000);
        assert!((info.duration - 5400.25).abs() < 1e-6);
        assert!((info.frame_rate - 23.976).abs() < 0.01);
        assert_eq!(info.placeholders.get("general.format_name").unwrap(), "matroska,webm");
    }

    #[test]
    fn test_no_video_stream() {
        let err = parse_ffprobe_json(br#"{"streams":[{"codec_type":"audio"}],"format":{}}"#).unwrap_err();
        assert!(matches!(err, Error::Probe(_)));
    }
}
