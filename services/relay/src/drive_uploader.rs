use crate::attachment::{UploadRequest, UploadedFile};
use crate::config::DriveConfig;
use crate::drive_auth::{ServiceAccountKey, ServiceAccountTokens, TokenSource};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_RANGE, LOCATION, RANGE};
use reqwest::StatusCode;
use serde::Deserialize;
use std::io::SeekFrom;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, error, info, instrument, warn};

/// Errors returned by the Drive storage client
#[derive(Error, Debug)]
pub enum DriveError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Drive API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid service account key: {0}")]
    InvalidKey(String),

    #[error("Failed to read staging file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upload session error: {0}")]
    Session(String),
}

/// Storage backend the relay handler uploads into
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Create a file inside `request.folder_id` from the staged bytes
    async fn create_file(&self, request: &UploadRequest) -> Result<UploadedFile, DriveError>;
}

/// File resource fields requested from the Drive API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    web_view_link: Option<String>,
}

impl From<DriveFile> for UploadedFile {
    fn from(file: DriveFile) -> Self {
        let link = file
            .web_view_link
            .unwrap_or_else(|| drive_view_link(&file.id));
        Self { id: file.id, link }
    }
}

/// Browser link for a Drive file id
pub fn drive_view_link(file_id: &str) -> String {
    format!("https://drive.google.com/file/d/{file_id}/view")
}

/// Load credentials and authenticate against Drive.
///
/// Returns `None` when no key is configured, the key cannot be loaded, or the
/// token exchange fails. The relay keeps running without storage in that case.
pub async fn connect_optional(config: &DriveConfig) -> Option<Arc<dyn StorageClient>> {
    let key = match ServiceAccountKey::from_config(config).await {
        Ok(Some(key)) => key,
        Ok(None) => {
            warn!("Google service account key is not set; uploads are disabled");
            return None;
        }
        Err(e) => {
            error!(error = %e, "Failed to load Google service account key");
            return None;
        }
    };

    match DriveUploader::connect(config, key).await {
        Ok(uploader) => Some(Arc::new(uploader)),
        Err(e) => {
            error!(error = %e, "Failed to authenticate with Google Drive");
            None
        }
    }
}

/// Google Drive client using resumable uploads
pub struct DriveUploader {
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    upload_url: String,
    chunk_size: usize,
}

impl DriveUploader {
    /// Authenticate with a service account and create the uploader.
    ///
    /// An access token is fetched immediately so bad credentials surface at
    /// startup rather than on the first attachment.
    pub async fn connect(config: &DriveConfig, key: ServiceAccountKey) -> Result<Self, DriveError> {
        let http = build_http_client(config)?;
        let client_email = key.client_email.clone();
        let tokens = ServiceAccountTokens::new(key, config.scope.clone(), http.clone())?;
        tokens.access_token().await?;

        info!(
            client_email = %client_email,
            upload_url = %config.upload_url,
            chunk_size_bytes = config.chunk_size_bytes,
            "Google Drive uploader initialized"
        );

        Ok(Self::with_token_source(config, http, Arc::new(tokens)))
    }

    /// Create an uploader with an already-built token source
    pub fn with_token_source(
        config: &DriveConfig,
        http: reqwest::Client,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            http,
            tokens,
            upload_url: config.upload_url.trim_end_matches('/').to_string(),
            chunk_size: config.chunk_size_bytes.max(1),
        }
    }

    /// Open a resumable upload session and return its URI
    async fn start_session(&self, request: &UploadRequest, total: u64) -> Result<String, DriveError> {
        let token = self.tokens.access_token().await?;
        let metadata = serde_json::json!({
            "name": request.file_name,
            "parents": [request.folder_id],
            "mimeType": request.mime_type,
        });

        let response = self
            .http
            .post(format!("{}/files", self.upload_url))
            .query(&[
                ("uploadType", "resumable"),
                ("fields", "id,webViewLink"),
                ("supportsAllDrives", "true"),
            ])
            .bearer_auth(&token)
            .header("X-Upload-Content-Type", request.mime_type.as_str())
            .header("X-Upload-Content-Length", total.to_string())
            .json(&metadata)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| DriveError::Session("response has no Location header".to_string()))
    }

    /// Send the staged file to the session in ranged chunks
    async fn send_chunks(
        &self,
        session_uri: &str,
        request: &UploadRequest,
        total: u64,
    ) -> Result<DriveFile, DriveError> {
        if total == 0 {
            let token = self.tokens.access_token().await?;
            let response = self
                .http
                .put(session_uri)
                .bearer_auth(&token)
                .header(CONTENT_RANGE, "bytes */0")
                .body(Vec::new())
                .send()
                .await?;
            return finish(response).await;
        }

        let mut file = tokio::fs::File::open(&request.path).await?;
        let mut offset = 0u64;

        loop {
            let mut chunk = Vec::with_capacity(self.chunk_size);
            (&mut file)
                .take(self.chunk_size as u64)
                .read_to_end(&mut chunk)
                .await?;

            if chunk.is_empty() {
                return Err(DriveError::Session(format!(
                    "staging file ended at byte {offset} of {total}"
                )));
            }

            let end = offset + chunk.len() as u64 - 1;
            let token = self.tokens.access_token().await?;
            let response = self
                .http
                .put(session_uri)
                .bearer_auth(&token)
                .header(CONTENT_RANGE, content_range(offset, end, total))
                .body(chunk)
                .send()
                .await?;

            if response.status() != StatusCode::PERMANENT_REDIRECT {
                return finish(response).await;
            }

            // 308: the session wants more; Range tells how much it kept
            let next = parse_confirmed_range(response.headers()).map_or(0, |last| last + 1);
            if next <= offset {
                return Err(DriveError::Session(format!(
                    "no progress confirmed after sending bytes {offset}-{end}"
                )));
            }
            if next != end + 1 {
                warn!(
                    sent_through = end,
                    confirmed_through = next - 1,
                    "Upload session kept a partial chunk, resending remainder"
                );
                file.seek(SeekFrom::Start(next)).await?;
            }
            offset = next;
            debug!(offset = offset, total = total, "Chunk accepted");
        }
    }
}

#[async_trait]
impl StorageClient for DriveUploader {
    #[instrument(skip(self, request), fields(file_name = %request.file_name, mime_type = %request.mime_type))]
    async fn create_file(&self, request: &UploadRequest) -> Result<UploadedFile, DriveError> {
        let total = tokio::fs::metadata(&request.path).await?.len();
        let session_uri = self.start_session(request, total).await?;

        debug!(size_bytes = total, "Resumable upload session opened");

        let file = self.send_chunks(&session_uri, request, total).await?;

        info!(
            file_id = %file.id,
            size_bytes = total,
            "File uploaded to Google Drive"
        );

        Ok(file.into())
    }
}

/// HTTP client for Drive calls; redirects are off so 308 reaches the caller
pub fn build_http_client(config: &DriveConfig) -> Result<reqwest::Client, DriveError> {
    let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
    if let Some(timeout) = config.request_timeout() {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}

async fn finish(response: reqwest::Response) -> Result<DriveFile, DriveError> {
    if response.status().is_success() {
        Ok(response.json::<DriveFile>().await?)
    } else {
        Err(api_error(response).await)
    }
}

async fn api_error(response: reqwest::Response) -> DriveError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    DriveError::Api { status, message }
}

fn content_range(start: u64, end: u64, total: u64) -> String {
    format!("bytes {start}-{end}/{total}")
}

/// Last byte index the session has persisted, from `Range: bytes=0-N`
fn parse_confirmed_range(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RANGE)?
        .to_str()
        .ok()?
        .rsplit('-')
        .next()?
        .trim()
        .parse()
        .ok()
}
