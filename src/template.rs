//! Text output for completed movies.
//!
//! Templates contain `%TOKEN%` placeholders. Named placeholders cover file,
//! media and per-host upload fields; any other token is looked up in the
//! movie's probe table (`%video.codec_name%`, `%general.format_name%`, ...).
//! Tokens that resolve to nothing render as [`UNRESOLVED`].

use std::sync::LazyLock;
use std::time::Duration;
use regex::{Captures, Regex};
use tracing::debug;
use crate::core::{HostUploads, MediaInfo, Movie};
use crate::uploaders::{ImageHost, UploadResult};
use crate::utils::{format_bitrate, format_bytes, format_duration};

pub const UNRESOLVED: &str = "-";

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%([A-Za-z0-9_.:\-]+)%").expect("placeholder pattern is valid"));

/// Substitutes every placeholder in one left-to-right pass; substituted text is
/// never scanned again.
pub fn render(template: &str, movie: &Movie) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| {
            let token = &caps[1];
            match resolve(token, movie) {
                Some(value) if !value.is_empty() => value,
                _ => {
                    debug!(token, movie_id = %movie.id, "Unresolved template placeholder");
                    UNRESOLVED.to_string()
                }
            }
        })
        .into_owned()
}

fn resolve(token: &str, movie: &Movie) -> Option<String> {
    match token {
        "FILE_NAME" => return Some(movie.name.clone()),
        "FILE_SIZE" => return Some(format_bytes(movie.size)),
        "FILE_SIZE_BYTES" => return Some(movie.size.to_string()),
        _ => {}
    }

    if let Some(value) = movie.media.as_ref().and_then(|media| media_field(token, media)) {
        return Some(value);
    }

    for host in ImageHost::ALL {
        if let Some(field) = token.strip_prefix(host.placeholder_key()).and_then(|rest| rest.strip_prefix('_')) {
            return upload_field(field, movie.uploads_for(Some(host))?);
        }
    }
    if let Some(uploads) = movie.uploads_for(None) {
        if let Some(value) = upload_field(token, uploads) {
            return Some(value);
        }
    }

    let media = movie.media.as_ref()?;
    media.placeholders.get(&token.to_lowercase()).cloned()
}

fn media_field(token: &str, media: &MediaInfo) -> Option<String> {
    let value = match token {
        "DURATION" => {
            if !media.duration.is_finite() || media.duration <= 0.0 {
                return None;
            }
            format_duration(Duration::try_from_secs_f64(media.duration).ok()?)
        }
        "WIDTH" => nonzero(media.width as u64)?,
        "HEIGHT" => nonzero(media.height as u64)?,
        "RESOLUTION" => {
            if media.width == 0 || media.height == 0 {
                return None;
            }
            format!("{}x{}", media.width, media.height)
        }
        "BITRATE" => format_bitrate(media.overall_bitrate),
        "VIDEO_BITRATE" => format_bitrate(media.video_bitrate),
        "AUDIO_BITRATE" => format_bitrate(media.audio_bitrate),
        "VIDEO_CODEC" => media.video_codec.clone(),
        "AUDIO_CODEC" => media.audio_codec.clone(),
        "FRAME_RATE" => format_frame_rate(media.frame_rate)?,
        _ => return None,
    };
    Some(value)
}

fn upload_field(field: &str, uploads: &HostUploads) -> Option<String> {
    let joined = |pick: fn(&UploadResult) -> &str, separator: &str| -> Option<String> {
        let parts: Vec<&str> = uploads.screenshots.iter().map(pick).filter(|s| !s.is_empty()).collect();
        if parts.is_empty() { None } else { Some(parts.join(separator)) }
    };

    match field {
        "THUMBNAIL" => uploads.thumbnail_link().map(str::to_string),
        "BIG_THUMBNAIL" => uploads.big_thumbnail_link(),
        "SCREENSHOTS" => joined(|r| r.bbcode.as_str(), "\n"),
        "SCREENSHOTS_INLINE" => joined(|r| r.bbcode.as_str(), " "),
        "SCREENSHOTS_HTML" => joined(|r| r.html.as_str(), "\n"),
        "SCREENSHOTS_MARKDOWN" => joined(|r| r.markdown.as_str(), "\n"),
        "SCREENSHOT_URLS" => joined(UploadResult::image_url, "\n"),
        "ALBUM" => uploads.album_url.clone(),
        _ => None,
    }
}

fn nonzero(value: u64) -> Option<String> {
    (value > 0).then(|| value.to_string())
}

fn format_frame_rate(fps: f64) -> Option<String> {
    if !fps.is_finite() || fps <= 0.0 {
        return None;
    }
    if (fps - fps.round()).abs() < 1e-3 {
        Some(format!("{}", fps.round() as u64))
    } else {
        Some(format!("{:.3}", fps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use crate::core::{MovieState, ProbeOutput};

    fn completed_movie() -> Movie {
        let mut movie = Movie::new(Path::new("/videos/Big Buck Bunny.mkv"), 1_073_741_824);

        let mut probe = ProbeOutput::default();
        probe.general.insert("duration".into(), "596.5".into());
        probe.general.insert("bit_rate".into(), "4500000".into());
        probe.general.insert("format_name".into(), "matroska,webm".into());
        probe.video.insert("codec_name".into(), "h264".into());
        probe.video.insert("width".into(), "1920".into());
        probe.video.insert("height".into(), "1080".into());
        probe.video.insert("r_frame_rate".into(), "24000/1001".into());
        probe.audio.insert("codec_name".into(), "aac".into());
        probe.audio.insert("bit_rate".into(), "192000".into());
        movie.media = Some(MediaInfo::from_probe(&probe));

        let uploads = HostUploads {
            thumbnail: Some(UploadResult::new(
                "https://images.imgbox.com/aa/grid.jpg",
                "https://imgbox.com/grid",
                "https://thumbs.imgbox.com/aa/grid_t.jpg",
                "grid.jpg",
            )),
            screenshots: vec![
                UploadResult::new("https://images.imgbox.com/s1.jpg", "https://imgbox.com/s1", "https://thumbs.imgbox.com/s1_t.jpg", "s1.jpg"),
                UploadResult::new("https://images.imgbox.com/s2.jpg", "https://imgbox.com/s2", "https://thumbs.imgbox.com/s2_t.jpg", "s2.jpg"),
            ],
            album_url: Some("https://imgbox.com/g/abc".to_string()),
        };
        movie.uploads.insert(ImageHost::Imgbox, uploads);
        movie.uploaded_to = Some(ImageHost::Imgbox);
        movie.state = MovieState::Completed;
        movie
    }

    #[test]
    fn test_named_placeholders() {
        let movie = completed_movie();
        let out = render("%FILE_NAME% | %FILE_SIZE% | %DURATION% | %RESOLUTION% | %FRAME_RATE%", &movie);
        assert_eq!(out, "Big Buck Bunny.mkv | 1.00 GiB | 00:09:56 | 1920x1080 | 23.976");

        let out = render("%VIDEO_CODEC%/%AUDIO_CODEC% %BITRATE% %AUDIO_BITRATE%", &movie);
        assert_eq!(out, "h264/aac 4500 kb/s 192 kb/s");
    }

    #[test]
    fn test_host_placeholders() {
        let movie = completed_movie();

        assert_eq!(
            render("%IMGBOX_THUMBNAIL%", &movie),
            "[url=https://imgbox.com/grid][img]https://thumbs.imgbox.com/aa/grid_t.jpg[/img][/url]"
        );
        assert_eq!(
            render("%IMGBOX_BIG_THUMBNAIL%", &movie),
            "[url=https://imgbox.com/grid][img]https://images.imgbox.com/aa/grid.jpg[/img][/url]"
        );
        assert_eq!(
            render("%IMGBOX_SCREENSHOT_URLS%", &movie),
            "https://images.imgbox.com/s1.jpg\nhttps://images.imgbox.com/s2.jpg"
        );
        assert_eq!(render("%SCREENSHOTS_INLINE%", &movie).matches("[url=").count(), 2);
        assert_eq!(render("%ALBUM%", &movie), "https://imgbox.com/g/abc");
        assert_eq!(render("%IMAGEBAM_SCREENSHOTS%", &movie), UNRESOLVED);
    }

    #[test]
    fn test_generic_and_unresolved_tokens() {
        let movie = completed_movie();
        assert_eq!(render("%general.format_name%", &movie), "matroska,webm");
        assert_eq!(render("%VIDEO.CODEC_NAME%", &movie), "h264");
        assert_eq!(render("[%NO_SUCH_TOKEN%]", &movie), "[-]");
        assert_eq!(render("100% done", &movie), "100% done");
    }

    #[test]
    fn test_substituted_values_are_not_rescanned() {
        let mut movie = completed_movie();
        movie.name = "%FILE_SIZE%".to_string();
        assert_eq!(render("%FILE_NAME%", &movie), "%FILE_SIZE%");
    }

    #[test]
    fn test_render_is_idempotent() {
        let movie = completed_movie();
        let template = crate::config::DEFAULT_TEMPLATE;
        assert_eq!(render(template, &movie), render(template, &movie));
    }

    #[test]
    fn test_absurd_duration_is_unresolved() {
        let mut movie = completed_movie();
        if let Some(media) = movie.media.as_mut() {
            media.duration = 1e30;
        }
        assert_eq!(render("%DURATION%", &movie), UNRESOLVED);
    }

    #[test]
    fn test_movie_without_media() {
        let movie = Movie::new(Path::new("/videos/a.mp4"), 512);
        assert_eq!(render("%FILE_NAME% %DURATION% %THUMBNAIL%", &movie), "a.mp4 - -");
    }
}
