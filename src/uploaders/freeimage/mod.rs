//! freeimage.host (Chevereto): account login through the public web form, then
//! uploads to the JSON endpoint with the page auth token.

use std::path::Path;
use std::sync::{Arc, LazyLock};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::multipart::Form;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;
use crate::core::{Error, Result, UploadClient};
use crate::utils::with_cancel;
use super::{ensure_success, file_part, http_client, truncate, ClientOptions, ImageHost, UploadResult};

pub const DEFAULT_BASE_URL: &str = "https://freeimage.host/";

const LOGIN_PATH: &str = "login";
const UPLOAD_PATH: &str = "json";
const LOGIN_COOKIE: &str = "KEEP_LOGIN";

static AUTH_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"auth_token\s*=\s*["']([^"']+)["']"#).expect("auth token pattern is valid"));

#[derive(Debug, Clone)]
struct FreeimageSession {
    auth_token: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    status_code: u16,
    image: Option<UploadedImage>,
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct UploadedImage {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    url_viewer: String,
    thumb: Option<ImageVariant>,
    medium: Option<ImageVariant>,
}

#[derive(Debug, Deserialize)]
struct ImageVariant {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

pub struct FreeimageClient {
    client: Client,
    jar: Arc<Jar>,
    base_url: Url,
    username: String,
    password: String,
    session: OnceCell<FreeimageSession>,
}

impl FreeimageClient {
    pub fn new(options: ClientOptions, username: String, password: String) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        Ok(Self {
            client: http_client(options.timeout, Some(jar.clone()))?,
            jar,
            base_url: options.base_url,
            username,
            password,
            session: OnceCell::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|err| Error::internal(format!("bad freeimage endpoint {}: {}", path, err)))
    }

    fn has_login_cookie(&self) -> bool {
        self.jar
            .cookies(&self.base_url)
            .and_then(|header| header.to_str().ok().map(|s| s.to_string()))
            .map(|cookies| {
                cookies
                    .split(';')
                    .any(|pair| pair.trim().split('=').next() == Some(LOGIN_COOKIE))
            })
            .unwrap_or(false)
    }

    async fn login(&self) -> Result<FreeimageSession> {
        let response = self.client.get(self.base_url.clone()).send().await?;
        let html = ensure_success(response, "freeimage landing page").await?.text().await?;
        let auth_token = extract_auth_token(&html)
            .ok_or_else(|| Error::session("freeimage landing page has no auth_token"))?;

        // The form answers with a redirect on success; the client follows it.
        let response = self.client
            .post(self.endpoint(LOGIN_PATH)?)
            .header("Referer", self.base_url.as_str())
            .form(&[
                ("login-subject", self.username.as_str()),
                ("password", self.password.as_str()),
                ("auth_token", auth_token.as_str()),
                ("keep-login", "1"),
            ])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !self.has_login_cookie() {
            return Err(Error::session(format!(
                "freeimage login failed (status {}): {}",
                status.as_u16(),
                truncate(&body, 512)
            )));
        }

        info!(host = "freeimage", user = %self.username, "Session established");
        Ok(FreeimageSession { auth_token })
    }
}

#[async_trait]
impl UploadClient for FreeimageClient {
    fn host(&self) -> ImageHost {
        ImageHost::Freeimage
    }

    async fn ensure_session(&self, cancel: &CancellationToken) -> Result<()> {
        with_cancel(cancel, self.session.get_or_try_init(|| self.login())).await?;
        Ok(())
    }

    async fn upload_file(&self, cancel: &CancellationToken, file_path: &Path, file_name: &str) -> Result<UploadResult> {
        let session = self.session
            .get()
            .ok_or_else(|| Error::session("freeimage session not established"))?;

        let part = file_part(file_path, file_name).await?;
        let form = Form::new()
            .part("source", part)
            .text("type", "file")
            .text("action", "upload")
            .text("timestamp", chrono::Utc::now().timestamp_millis().to_string())
            .text("auth_token", session.auth_token.clone())
            .text("nsfw", "0");

        let request = self.client
            .post(self.endpoint(UPLOAD_PATH)?)
            .header("Referer", self.base_url.as_str())
            .header("Accept", "application/json")
            .multipart(form)
            .send();

        let body = with_cancel(cancel, async {
            let response = request.await?;
            let response = ensure_success(response, "freeimage upload").await?;
            Ok(response.text().await?)
        })
        .await?;

        debug!(host = "freeimage", file = file_name, "Upload response received");
        parse_upload_response(&body, file_name)
    }
}

/// `PF.obj.config.auth_token = "...";` from the inline page script
pub(crate) fn extract_auth_token(html: &str) -> Option<String> {
    AUTH_TOKEN_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub(crate) fn parse_upload_response(body: &str, file_name: &str) -> Result<UploadResult> {
    let response: UploadResponse = serde_json::from_str(body)?;

    let Some(image) = response.image else {
        let message = response.error
            .map(|e| e.message)
            .unwrap_or_else(|| "response has no image".to_string());
        let status = if response.status_code == 0 { 500 } else { response.status_code };
        return Err(Error::server_error(status, format!("freeimage rejected upload: {}", message)));
    };

    if image.url.is_empty() {
        return Err(Error::parse("freeimage response has no image url"));
    }

    // Prefer the medium rendition for the inline preview, it keeps text readable.
    let thumbnail = image.medium
        .map(|m| m.url)
        .filter(|u| !u.is_empty())
        .or_else(|| image.thumb.map(|t| t.url))
        .unwrap_or_default();
    let name = if image.filename.is_empty() { file_name } else { image.filename.as_str() };

    Ok(UploadResult::new(image.url, image.url_viewer, thumbnail, name))
}
