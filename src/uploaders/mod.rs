pub mod imagebam;
pub mod freeimage;
pub mod imgbox;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use reqwest::multipart::Part;
use reqwest::{Body, Client, Response};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use crate::config::HostsConfig;
use crate::core::{Error, Result, UploadClient};

pub use freeimage::FreeimageClient;
pub use imagebam::ImagebamClient;
pub use imgbox::ImgboxClient;

/// Extensions the hosts are known to accept
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

pub(crate) const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Supported image hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageHost {
    Imagebam,
    Freeimage,
    Imgbox,
}

impl ImageHost {
    pub const ALL: [ImageHost; 3] = [ImageHost::Imagebam, ImageHost::Freeimage, ImageHost::Imgbox];

    pub fn as_str(self) -> &'static str {
        match self {
            ImageHost::Imagebam => "imagebam",
            ImageHost::Freeimage => "freeimage",
            ImageHost::Imgbox => "imgbox",
        }
    }

    /// Prefix used by template placeholders, e.g. `IMGBOX`
    pub fn placeholder_key(self) -> &'static str {
        match self {
            ImageHost::Imagebam => "IMAGEBAM",
            ImageHost::Freeimage => "FREEIMAGE",
            ImageHost::Imgbox => "IMGBOX",
        }
    }
}

impl std::fmt::Display for ImageHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageHost {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ImageHost::ALL
            .into_iter()
            .find(|host| host.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Config(format!("unknown image host: {}", s)))
    }
}

/// One hosted image, normalized across hosts.
///
/// Empty strings mark links the host does not provide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct UploadResult {
    pub direct_url: String,
    pub viewer_url: String,
    pub thumbnail_url: String,
    pub bbcode: String,
    pub html: String,
    pub markdown: String,
}

impl UploadResult {
    /// Builds the rendered variants from the raw links. A viewer link that is not
    /// an absolute http(s) URL is discarded.
    pub fn new(
        direct_url: impl Into<String>,
        viewer_url: impl Into<String>,
        thumbnail_url: impl Into<String>,
        name: &str,
    ) -> Self {
        let direct_url = direct_url.into();
        let thumbnail_url = thumbnail_url.into();
        let mut viewer_url = viewer_url.into();
        if !is_absolute_http(&viewer_url) {
            viewer_url.clear();
        }

        let image = if thumbnail_url.is_empty() { &direct_url } else { &thumbnail_url };
        let (bbcode, html, markdown) = match (image.is_empty(), viewer_url.is_empty()) {
            (true, _) => (String::new(), String::new(), String::new()),
            (false, true) => (
                format!("[img]{}[/img]", image),
                format!("<img src=\"{}\" alt=\"{}\">", image, name),
                format!("![{}]({})", name, image),
            ),
            (false, false) => (
                format!("[url={}][img]{}[/img][/url]", viewer_url, image),
                format!("<a href=\"{}\" target=\"_blank\"><img src=\"{}\" alt=\"{}\"></a>", viewer_url, image, name),
                format!("[![{}]({})]({})", name, image, viewer_url),
            ),
        };

        Self {
            direct_url,
            viewer_url,
            thumbnail_url,
            bbcode,
            html,
            markdown,
        }
    }

    /// Best link to the image itself
    pub fn image_url(&self) -> &str {
        if !self.direct_url.is_empty() {
            &self.direct_url
        } else if !self.viewer_url.is_empty() {
            &self.viewer_url
        } else {
            &self.thumbnail_url
        }
    }
}

fn is_absolute_http(value: &str) -> bool {
    Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Per-host connection settings
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: Url,
    pub timeout: Duration,
}

/// Creates the client for `host` from the configured credentials and endpoints.
pub fn build_client(host: ImageHost, hosts: &HostsConfig, timeout: Duration) -> Result<Arc<dyn UploadClient>> {
    let client: Arc<dyn UploadClient> = match host {
        ImageHost::Imagebam => Arc::new(ImagebamClient::new(
            ClientOptions {
                base_url: parse_base_url(hosts.imagebam.base_url.as_deref(), imagebam::DEFAULT_BASE_URL)?,
                timeout,
            },
            hosts.imagebam.session_cookie.clone(),
        )?),
        ImageHost::Freeimage => {
            let settings = &hosts.freeimage;
            let (Some(username), Some(password)) = (settings.username.clone(), settings.password.clone()) else {
                return Err(Error::Config("freeimage requires username and password".to_string()));
            };
            Arc::new(FreeimageClient::new(
                ClientOptions {
                    base_url: parse_base_url(settings.base_url.as_deref(), freeimage::DEFAULT_BASE_URL)?,
                    timeout,
                },
                username,
                password,
            )?)
        }
        ImageHost::Imgbox => Arc::new(ImgboxClient::new(ClientOptions {
            base_url: parse_base_url(hosts.imgbox.base_url.as_deref(), imgbox::DEFAULT_BASE_URL)?,
            timeout,
        })?),
    };
    Ok(client)
}

fn parse_base_url(configured: Option<&str>, default: &str) -> Result<Url> {
    let raw = configured.unwrap_or(default);
    Url::parse(raw).map_err(|err| Error::Config(format!("invalid base url {}: {}", raw, err)))
}

/// Validates `file_path` and hands it to `client`.
///
/// Zero-byte and unreadable files are rejected before any request is made;
/// unknown extensions only produce a warning.
pub async fn upload_artifact(
    client: &dyn UploadClient,
    cancel: &CancellationToken,
    file_path: &Path,
) -> Result<UploadResult> {
    let meta = tokio::fs::metadata(file_path).await?;
    if !meta.is_file() {
        return Err(Error::validation(format!("{} is not a file", file_path.display())));
    }
    if meta.len() == 0 {
        return Err(Error::validation(format!("{} is empty", file_path.display())));
    }

    let known = file_path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false);
    if !known {
        warn!(file = %file_path.display(), host = %client.host(), "Uploading file with unrecognized image extension");
    }

    let file_name = file_path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::validation(format!("{} has no file name", file_path.display())))?;

    debug!(file = %file_path.display(), host = %client.host(), "Uploading artifact");
    client.upload_file(cancel, file_path, &file_name).await
}

/// Shared reqwest client: browser user agent, optional cookie jar, client-wide timeout.
pub(crate) fn http_client(timeout: Duration, jar: Option<Arc<reqwest::cookie::Jar>>) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout);
    if let Some(jar) = jar {
        builder = builder.cookie_provider(jar);
    }
    Ok(builder.build()?)
}

/// Passes 2xx responses through; anything else becomes a server error carrying
/// the response body.
pub(crate) async fn ensure_success(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::server_error(status.as_u16(), format!("{}: {}", context, truncate(&body, 512))))
}

/// Streams the image from disk into a multipart part.
pub(crate) async fn file_part(file_path: &Path, file_name: &str) -> Result<Part> {
    let file = tokio::fs::File::open(file_path).await?;
    let length = file.metadata().await?.len();
    let body = Body::wrap_stream(ReaderStream::new(file));
    let part = Part::stream_with_length(body, length)
        .file_name(file_name.to_string())
        .mime_str(mime_for(file_name))?;
    Ok(part)
}

pub(crate) fn mime_for(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "image/jpeg",
    }
}

/// Resolves a possibly relative link against `base`.
pub(crate) fn absolutize(base: &Url, link: &str) -> String {
    if link.is_empty() {
        return String::new();
    }
    if link.starts_with("//") {
        return format!("{}:{}", base.scheme(), link);
    }
    base.join(link).map(|u| u.to_string()).unwrap_or_else(|_| link.to_string())
}

pub(crate) fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
