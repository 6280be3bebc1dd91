//! Publishing a cached wallpaper to the server.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info, warn};
use wallstream_protocol::media::content_type_for_ext;
use wallstream_protocol::{
    ErrorResponse, MessageResponse, PublishRequest, RegisterDeviceRequest, UploadResponse,
};

/// Errors from uploading and publishing a wallpaper.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server already holds this content for the device.
    #[error("wallpaper already published")]
    Duplicate,

    #[error("server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl UploadError {
    /// Whether resending the same wallpaper can never succeed.
    ///
    /// Client errors are final, except for credentials, timeouts and rate limits.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Rejected { status, .. } => {
                (400..500).contains(status) && !matches!(status, 401 | 408 | 429)
            }
            _ => false,
        }
    }
}

/// Boxed future returned by [`Uploader::upload`].
pub type UploadFuture<'a> = Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + 'a>>;

/// Hands a freshly cached wallpaper to the server.
pub trait Uploader: Send + Sync {
    /// Uploads the file at `path` whose digest is `hash` and publishes it.
    fn upload<'a>(&'a self, path: &'a Path, hash: &'a str) -> UploadFuture<'a>;
}

/// [`Uploader`] over the server's REST API with HTTP Basic credentials.
///
/// The device is registered on the first upload; an already registered
/// device is accepted as is.
pub struct HttpUploader {
    http: reqwest::Client,
    server_url: String,
    device_id: String,
    username: String,
    api_key: String,
    registered: AtomicBool,
}

impl HttpUploader {
    pub fn new(
        server_url: &str,
        device_id: &str,
        username: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, UploadError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            server_url: server_url.trim_end_matches('/').to_string(),
            device_id: device_id.to_string(),
            username: username.to_string(),
            api_key: api_key.to_string(),
            registered: AtomicBool::new(false),
        })
    }

    async fn ensure_registered(&self) -> Result<(), UploadError> {
        if self.registered.load(Ordering::Acquire) {
            return Ok(());
        }

        let request = RegisterDeviceRequest {
            device_id: self.device_id.clone(),
        };
        let resp = self
            .http
            .post(format!("{}/api/publisher/devices", self.server_url))
            .basic_auth(&self.username, Some(&self.api_key))
            .json(&request)
            .send()
            .await?;

        match check(resp).await {
            Ok(_) => info!(device_id = %self.device_id, "device registered"),
            Err(UploadError::Duplicate) => {
                debug!(device_id = %self.device_id, "device already registered")
            }
            Err(e) => return Err(e),
        }
        self.registered.store(true, Ordering::Release);
        Ok(())
    }

    /// Sends the raw image and returns the server-side file name.
    async fn upload_file(&self, path: &Path) -> Result<String, UploadError> {
        let data = tokio::fs::read(path).await?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();

        let resp = self
            .http
            .post(format!("{}/api/files/upload", self.server_url))
            .basic_auth(&self.username, Some(&self.api_key))
            .header(CONTENT_TYPE, content_type_for_ext(ext))
            .body(data)
            .send()
            .await?;

        let body = check(resp).await?;
        let uploaded: UploadResponse = serde_json::from_slice(&body)?;
        Ok(uploaded.filename)
    }

    async fn publish(&self, filename: &str) -> Result<(), UploadError> {
        let request = PublishRequest {
            filename: filename.to_string(),
            device_id: self.device_id.clone(),
        };
        let resp = self
            .http
            .post(format!("{}/api/publisher/wallpaper", self.server_url))
            .basic_auth(&self.username, Some(&self.api_key))
            .json(&request)
            .send()
            .await?;

        let body = check(resp).await?;
        if let Ok(msg) = serde_json::from_slice::<MessageResponse>(&body) {
            debug!(message = %msg.message, "publish acknowledged");
        }
        Ok(())
    }

    async fn upload_and_publish(&self, path: &Path, hash: &str) -> Result<(), UploadError> {
        self.ensure_registered().await?;
        let filename = self.upload_file(path).await?;
        if !filename.starts_with(hash) {
            warn!(%filename, hash, "server named the upload after a different digest");
        }
        self.publish(&filename).await?;
        info!(hash, device_id = %self.device_id, "wallpaper published");
        Ok(())
    }
}

impl Uploader for HttpUploader {
    fn upload<'a>(&'a self, path: &'a Path, hash: &'a str) -> UploadFuture<'a> {
        Box::pin(self.upload_and_publish(path, hash))
    }
}

/// Maps a response to its body or the matching [`UploadError`].
async fn check(resp: reqwest::Response) -> Result<Vec<u8>, UploadError> {
    let status = resp.status();
    let body = resp.bytes().await?.to_vec();
    if status.is_success() {
        return Ok(body);
    }
    if status == StatusCode::CONFLICT {
        return Err(UploadError::Duplicate);
    }

    let message = serde_json::from_slice::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
    Err(UploadError::Rejected {
        status: status.as_u16(),
        message,
    })
}
