//! imgbox.com: CSRF token from the landing form, then a per-run token pair from
//! the token endpoint. Uploads answer with an array of per-file objects.

use std::path::Path;
use std::sync::{Arc, LazyLock};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use reqwest::multipart::Form;
use serde::{Deserialize, Deserializer};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;
use crate::core::{Error, Result, UploadClient};
use crate::utils::with_cancel;
use super::{absolutize, ensure_success, file_part, http_client, ClientOptions, ImageHost, UploadResult};

pub const DEFAULT_BASE_URL: &str = "https://imgbox.com/";

const TOKEN_PATH: &str = "ajax/token/generate";
const UPLOAD_PATH: &str = "upload/process";
const CONTENT_TYPE_FAMILY_SAFE: &str = "1";
const THUMBNAIL_SIZE: &str = "350r";

static INPUT_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<input\b[^>]*>"#).expect("input tag pattern is valid"));
static ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\b([a-z_:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("attribute pattern is valid")
});

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ImgboxSession {
    pub csrf_token: String,
    pub token_id: String,
    pub token_secret: String,
    pub gallery_id: Option<String>,
    pub gallery_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(deserialize_with = "string_or_number")]
    token_id: String,
    token_secret: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    gallery_id: Option<String>,
    #[serde(default)]
    gallery_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    files: Vec<UploadedFile>,
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    #[serde(default)]
    url: String,
    #[serde(default)]
    original_url: String,
    #[serde(default)]
    thumbnail_url: String,
    #[serde(default)]
    name: String,
}

pub struct ImgboxClient {
    client: Client,
    base_url: Url,
    session: OnceCell<ImgboxSession>,
}

impl ImgboxClient {
    pub fn new(options: ClientOptions) -> Result<Self> {
        let jar = Arc::new(reqwest::cookie::Jar::default());
        Ok(Self {
            client: http_client(options.timeout, Some(jar))?,
            base_url: options.base_url,
            session: OnceCell::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|err| Error::internal(format!("bad imgbox endpoint {}: {}", path, err)))
    }

    async fn open_session(&self) -> Result<ImgboxSession> {
        let response = self.client.get(self.base_url.clone()).send().await?;
        let html = ensure_success(response, "imgbox landing page").await?.text().await?;

        let csrf_token = hidden_input_value(&html, "authenticity_token")
            .ok_or_else(|| Error::session("imgbox landing page has no authenticity_token"))?;

        let response = self.client
            .post(self.endpoint(TOKEN_PATH)?)
            .header("X-CSRF-Token", &csrf_token)
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Referer", self.base_url.as_str())
            .form(&[("gallery", "true"), ("gallery_title", ""), ("comments_enabled", "0")])
            .send()
            .await?;
        let body = ensure_success(response, "imgbox token request").await?.text().await?;

        let session = parse_token_response(&body, csrf_token)?;
        info!(host = "imgbox", token_id = %session.token_id, "Session established");
        Ok(session)
    }
}

#[async_trait]
impl UploadClient for ImgboxClient {
    fn host(&self) -> ImageHost {
        ImageHost::Imgbox
    }

    async fn ensure_session(&self, cancel: &CancellationToken) -> Result<()> {
        with_cancel(cancel, self.session.get_or_try_init(|| self.open_session())).await?;
        Ok(())
    }

    async fn upload_file(&self, cancel: &CancellationToken, file_path: &Path, file_name: &str) -> Result<UploadResult> {
        let session = self.session
            .get()
            .ok_or_else(|| Error::session("imgbox session not established"))?;

        let part = file_part(file_path, file_name).await?;
        let form = Form::new()
            .text("token_id", session.token_id.clone())
            .text("token_secret", session.token_secret.clone())
            .text("content_type", CONTENT_TYPE_FAMILY_SAFE)
            .text("thumbnail_size", THUMBNAIL_SIZE)
            .text("gallery_id", session.gallery_id.clone().unwrap_or_else(|| "null".to_string()))
            .text("gallery_secret", session.gallery_secret.clone().unwrap_or_else(|| "null".to_string()))
            .text("comments_enabled", "0")
            .part("files[]", part);

        let request = self.client
            .post(self.endpoint(UPLOAD_PATH)?)
            .header("X-CSRF-Token", &session.csrf_token)
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Referer", self.base_url.as_str())
            .multipart(form)
            .send();

        let body = with_cancel(cancel, async {
            let response = request.await?;
            let response = ensure_success(response, "imgbox upload").await?;
            Ok(response.text().await?)
        })
        .await?;

        debug!(host = "imgbox", file = file_name, "Upload response received");
        parse_upload_response(&body, &self.base_url, file_name)
    }

    fn album_url(&self) -> Option<String> {
        let gallery_id = self.session.get()?.gallery_id.as_deref()?;
        self.base_url.join(&format!("g/{}", gallery_id)).ok().map(|u| u.to_string())
    }
}

pub(crate) fn parse_token_response(body: &str, csrf_token: String) -> Result<ImgboxSession> {
    let token: TokenResponse = serde_json::from_str(body)
        .map_err(|err| Error::session(format!("imgbox token response unreadable: {}", err)))?;

    if token.token_id.is_empty() || token.token_secret.is_empty() {
        return Err(Error::session("imgbox returned an empty token pair"));
    }

    Ok(ImgboxSession {
        csrf_token,
        token_id: token.token_id,
        token_secret: token.token_secret,
        gallery_id: token.gallery_id.filter(|g| !g.is_empty()),
        gallery_secret: token.gallery_secret.filter(|g| !g.is_empty()),
    })
}

pub(crate) fn parse_upload_response(body: &str, base_url: &Url, file_name: &str) -> Result<UploadResult> {
    let response: UploadResponse = serde_json::from_str(body)?;
    let file = response.files
        .into_iter()
        .next()
        .ok_or_else(|| Error::parse("imgbox response lists no files"))?;

    if file.original_url.is_empty() && file.url.is_empty() {
        return Err(Error::parse("imgbox response has no image links"));
    }

    let name = if file.name.is_empty() { file_name } else { file.name.as_str() };
    Ok(UploadResult::new(
        absolutize(base_url, &file.original_url),
        absolutize(base_url, &file.url),
        absolutize(base_url, &file.thumbnail_url),
        name,
    ))
}

/// Value of the `<input name="...">` with the given name, whatever the
/// attribute order.
pub(crate) fn hidden_input_value(html: &str, name: &str) -> Option<String> {
    for tag in INPUT_TAG_RE.find_iter(html) {
        let mut tag_name = None;
        let mut tag_value = None;
        for caps in ATTRIBUTE_RE.captures_iter(tag.as_str()) {
            let key = caps.get(1).map(|m| m.as_str().to_ascii_lowercase());
            let value = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str().to_string());
            match key.as_deref() {
                Some("name") => tag_name = value,
                Some("value") => tag_value = value,
                _ => {}
            }
        }
        if tag_name.as_deref() == Some(name) {
            return tag_value.filter(|v| !v.is_empty());
        }
    }
    None
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number, got {}", other))),
    }
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!("expected string or number, got {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LANDING: &str = r#"<html><body>
        <form action="/upload" method="post">
          <input type="hidden" value="q1w2e3r4t5==" name="authenticity_token">
          <input type="file" name="files[]">
        </form></body></html>"#;

    const UPLOAD: &str = r#"{"files":[{"id":"8kjx2mQp","slug":"8kjx2mQp","name":"shot_01.jpg",
        "name_html_escaped":"shot_01.jpg","created_at":"2024-03-02T10:11:12.000Z",
        "url":"https://imgbox.com/8kjx2mQp",
        "original_url":"https://images2.imgbox.com/aa/bb/8kjx2mQp_o.jpg",
        "thumbnail_url":"https://thumbs2.imgbox.com/aa/bb/8kjx2mQp_t.jpg",
        "square_url":"https://thumbs2.imgbox.com/aa/bb/8kjx2mQp_b.jpg",
        "selected":false,"comments_enabled":0,"comments_count":0}]}"#;

    #[test]
    fn test_hidden_input_value() {
        assert_eq!(hidden_input_value(LANDING, "authenticity_token").as_deref(), Some("q1w2e3r4t5=="));
        assert_eq!(hidden_input_value(LANDING, "missing"), None);
        let reordered = r#"<input name='authenticity_token' value='abc' type='hidden'/>"#;
        assert_eq!(hidden_input_value(reordered, "authenticity_token").as_deref(), Some("abc"));
    }

    #[test]
    fn test_token_id_numeric_or_string() {
        let numeric = r#"{"ok":true,"token_id":1234567,"token_secret":"s3cr3t","gallery_id":"G1","gallery_secret":"gs"}"#;
        let session = parse_token_response(numeric, "csrf".into()).unwrap();
        assert_eq!(session.token_id, "1234567");
        assert_eq!(session.gallery_id.as_deref(), Some("G1"));

        let text = r#"{"ok":true,"token_id":"1234567","token_secret":"s3cr3t","gallery_id":null}"#;
        let session = parse_token_response(text, "csrf".into()).unwrap();
        assert_eq!(session.token_id, "1234567");
        assert_eq!(session.gallery_id, None);

        assert!(parse_token_response(r#"{"ok":false}"#, "csrf".into()).is_err());
    }

    #[test]
    fn test_golden_upload_response() {
        let base = Url::parse(DEFAULT_BASE_URL).unwrap();
        let result = parse_upload_response(UPLOAD, &base, "ignored.jpg").unwrap();
        assert_eq!(result, UploadResult {
            direct_url: "https://images2.imgbox.com/aa/bb/8kjx2mQp_o.jpg".into(),
            viewer_url: "https://imgbox.com/8kjx2mQp".into(),
            thumbnail_url: "https://thumbs2.imgbox.com/aa/bb/8kjx2mQp_t.jpg".into(),
            bbcode: "[url=https://imgbox.com/8kjx2mQp][img]https://thumbs2.imgbox.com/aa/bb/8kjx2mQp_t.jpg[/img][/url]".into(),
            html: "<a href=\"https://imgbox.com/8kjx2mQp\" target=\"_blank\"><img src=\"https://thumbs2.imgbox.com/aa/bb/8kjx2mQp_t.jpg\" alt=\"shot_01.jpg\"></a>".into(),
            markdown: "[![shot_01.jpg](https://thumbs2.imgbox.com/aa/bb/8kjx2mQp_t.jpg)](https://imgbox.com/8kjx2mQp)".into(),
        });
    }

    #[test]
    fn test_empty_file_list_is_error() {
        let base = Url::parse(DEFAULT_BASE_URL).unwrap();
        assert!(parse_upload_response(r#"{"files":[]}"#, &base, "a.jpg").is_err());
    }

    fn client_for(server: &MockServer) -> ImgboxClient {
        ImgboxClient::new(ClientOptions {
            base_url: Url::parse(&format!("{}/", server.uri())).unwrap(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_session_is_established_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LANDING))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST")).and(path("/ajax/token/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"ok":true,"token_id":42,"token_secret":"sec","gallery_id":"GAL","gallery_secret":"gsec"}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let cancel = CancellationToken::new();
        client.ensure_session(&cancel).await.unwrap();
        client.ensure_session(&cancel).await.unwrap();
        assert_eq!(client.album_url(), Some(format!("{}/g/GAL", server.uri())));
    }

    #[tokio::test]
    async fn test_upload_file_sends_tokens_and_parses_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LANDING))
            .mount(&server)
            .await;
        Mock::given(method("POST")).and(path("/ajax/token/generate"))
            .and(header("x-csrf-token", "q1w2e3r4t5=="))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"ok":true,"token_id":42,"token_secret":"sec","gallery_id":"GAL","gallery_secret":"gsec"}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST")).and(path("/upload/process"))
            .and(header("x-csrf-token", "q1w2e3r4t5=="))
            .and(header("x-requested-with", "XMLHttpRequest"))
            .and(body_string_contains("name=\"token_id\""))
            .and(body_string_contains("name=\"token_secret\""))
            .and(body_string_contains("name=\"gallery_id\""))
            .and(body_string_contains("GAL"))
            .and(body_string_contains("name=\"files[]\"; filename=\"shot_01.jpg\""))
            .respond_with(ResponseTemplate::new(200).set_body_string(UPLOAD))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("shot_01.jpg");
        std::fs::write(&file, "jpeg payload").unwrap();

        let client = client_for(&server);
        let cancel = CancellationToken::new();
        client.ensure_session(&cancel).await.unwrap();
        let result = client.upload_file(&cancel, &file, "shot_01.jpg").await.unwrap();

        assert_eq!(result.direct_url, "https://images2.imgbox.com/aa/bb/8kjx2mQp_o.jpg");
        assert_eq!(result.viewer_url, "https://imgbox.com/8kjx2mQp");
        assert_eq!(result.thumbnail_url, "https://thumbs2.imgbox.com/aa/bb/8kjx2mQp_t.jpg");
    }

    #[tokio::test]
    async fn test_session_fails_on_non_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.ensure_session(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Server { status_code: 503, .. }));
    }
}
