//! imagebam.com: a session cookie plus an upload-session token embedded in the
//! landing page script. The upload answer is flat JSON whose `data` field holds
//! an HTML fragment with the viewer link and thumbnail.

use std::path::Path;
use std::sync::LazyLock;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::multipart::Form;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;
use crate::core::{Error, Result, UploadClient};
use crate::utils::with_cancel;
use super::{absolutize, ensure_success, file_part, http_client, ClientOptions, ImageHost, UploadResult};

pub const DEFAULT_BASE_URL: &str = "https://www.imagebam.com/";

pub const SESSION_COOKIE: &str = "imagebam_session";
const UPLOAD_PATH: &str = "upload";
const CONTENT_TYPE_FAMILY_SAFE: &str = "sfw";
const THUMBNAIL_SIZE: &str = "2";

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<script\b[^>]*>(.*?)</script>"#).expect("script pattern is valid"));
static UPLOAD_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']?upload_session["']?\s*[:=]\s*["']([A-Za-z0-9_\-]+)["']"#).expect("upload token pattern is valid")
});
static LINKED_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*\bhref\s*=\s*["']([^"']+)["'][^>]*>\s*<img\b[^>]*\bsrc\s*=\s*["']([^"']+)["']"#)
        .expect("linked image pattern is valid")
});

#[derive(Debug, Clone, PartialEq)]
struct ImagebamSession {
    /// `name=value` pair sent with every request
    cookie: String,
    upload_token: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: String,
    #[serde(default)]
    message: String,
}

pub struct ImagebamClient {
    client: Client,
    base_url: Url,
    known_cookie: Option<String>,
    session: OnceCell<ImagebamSession>,
}

impl ImagebamClient {
    /// `session_cookie` is a previously issued cookie value to reuse, if any.
    pub fn new(options: ClientOptions, session_cookie: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http_client(options.timeout, None)?,
            base_url: options.base_url,
            known_cookie: session_cookie
                .filter(|c| !c.trim().is_empty())
                .map(|c| format!("{}={}", SESSION_COOKIE, c.trim())),
            session: OnceCell::new(),
        })
    }

    async fn open_session(&self) -> Result<ImagebamSession> {
        let mut request = self.client.get(self.base_url.clone());
        if let Some(cookie) = &self.known_cookie {
            request = request.header(COOKIE, cookie);
        }
        let response = ensure_success(request.send().await?, "imagebam landing page").await?;

        let harvested = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(session_cookie_from_header);
        let cookie = self.known_cookie
            .clone()
            .or(harvested)
            .ok_or_else(|| Error::session("imagebam issued no session cookie"))?;

        let html = response.text().await?;
        let upload_token = extract_upload_token(&html)
            .ok_or_else(|| Error::session("imagebam landing page has no upload session token"))?;

        info!(host = "imagebam", "Session established");
        Ok(ImagebamSession { cookie, upload_token })
    }
}

#[async_trait]
impl UploadClient for ImagebamClient {
    fn host(&self) -> ImageHost {
        ImageHost::Imagebam
    }

    async fn ensure_session(&self, cancel: &CancellationToken) -> Result<()> {
        with_cancel(cancel, self.session.get_or_try_init(|| self.open_session())).await?;
        Ok(())
    }

    async fn upload_file(&self, cancel: &CancellationToken, file_path: &Path, file_name: &str) -> Result<UploadResult> {
        let session = self.session
            .get()
            .ok_or_else(|| Error::session("imagebam session not established"))?;

        let upload_url = self.base_url
            .join(UPLOAD_PATH)
            .map_err(|err| Error::internal(format!("bad imagebam endpoint: {}", err)))?;

        let part = file_part(file_path, file_name).await?;
        let form = Form::new()
            .text("upload_session", session.upload_token.clone())
            .text("content_type", CONTENT_TYPE_FAMILY_SAFE)
            .text("thumbnail_size", THUMBNAIL_SIZE)
            .part("files[]", part);

        let request = self.client
            .post(upload_url)
            .header(COOKIE, &session.cookie)
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Referer", self.base_url.as_str())
            .multipart(form)
            .send();

        let body = with_cancel(cancel, async {
            let response = request.await?;
            let response = ensure_success(response, "imagebam upload").await?;
            Ok(response.text().await?)
        })
        .await?;

        debug!(host = "imagebam", file = file_name, "Upload response received");
        parse_upload_response(&body, &self.base_url, file_name)
    }
}

/// `imagebam_session=...` out of one `Set-Cookie` header
fn session_cookie_from_header(header: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    (name.trim() == SESSION_COOKIE && !value.is_empty()).then(|| pair.to_string())
}

/// Looks for `upload_session: "..."` (or `=`) inside the page's script blocks.
pub(crate) fn extract_upload_token(html: &str) -> Option<String> {
    SCRIPT_RE
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .find_map(|body| UPLOAD_TOKEN_RE.captures(body.as_str()))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub(crate) fn parse_upload_response(body: &str, base_url: &Url, file_name: &str) -> Result<UploadResult> {
    let response: UploadResponse = serde_json::from_str(body)?;
    if !response.status.eq_ignore_ascii_case("success") {
        let message = if response.message.is_empty() { response.status } else { response.message };
        return Err(Error::server_error(200, format!("imagebam rejected upload: {}", message)));
    }

    let caps = LINKED_IMAGE_RE
        .captures(&response.data)
        .ok_or_else(|| Error::parse("imagebam response has no linked thumbnail"))?;

    let viewer = caps.get(1).map(|m| absolutize(base_url, m.as_str())).unwrap_or_default();
    let thumbnail = caps.get(2).map(|m| absolutize(base_url, m.as_str())).unwrap_or_default();

    // imagebam only exposes the full-size image on its viewer page.
    Ok(UploadResult::new(String::new(), viewer, thumbnail, file_name))
}
