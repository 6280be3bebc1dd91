//! Network fetch capability used by the subscriber.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;
use wallstream_protocol::PublisherStateDescriptor;

use crate::SyncError;

/// Boxed future returned by [`RemoteSource`] methods.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SyncError>> + Send + 'a>>;

/// A downloaded body together with its declared content type.
#[derive(Debug, Clone)]
pub struct Download {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Source of publisher descriptors and wallpaper bytes.
///
/// Implemented over HTTP by [`HttpRemote`]; tests substitute mocks.
pub trait RemoteSource: Send + Sync {
    /// Fetches the current descriptor of `publisher_id`.
    fn fetch_state<'a>(&'a self, publisher_id: &'a str)
    -> RemoteFuture<'a, PublisherStateDescriptor>;

    /// Downloads the body at `url`. Only a 200 response is accepted.
    fn download<'a>(&'a self, url: &'a str) -> RemoteFuture<'a, Download>;
}

/// [`RemoteSource`] backed by a `reqwest` client with a bounded timeout.
pub struct HttpRemote {
    http: reqwest::Client,
    server_url: String,
}

impl HttpRemote {
    /// Creates a client for `server_url` whose every request is bounded by `timeout`.
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            server_url: server_url.trim_end_matches('/').to_string(),
        })
    }

    /// URL of the descriptor endpoint for `publisher_id`.
    pub fn state_url(&self, publisher_id: &str) -> String {
        let encoded = utf8_percent_encode(publisher_id, NON_ALPHANUMERIC);
        format!("{}/state/{encoded}", self.server_url)
    }

    /// Resolves server-relative URLs (`/files/...`) against the server.
    fn resolve(&self, url: &str) -> String {
        if url.starts_with('/') {
            format!("{}{url}", self.server_url)
        } else {
            url.to_string()
        }
    }

    async fn get_state(&self, publisher_id: &str) -> Result<PublisherStateDescriptor, SyncError> {
        let url = self.state_url(publisher_id);
        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(SyncError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = resp.bytes().await?;
        let descriptor: PublisherStateDescriptor = serde_json::from_slice(&body)?;
        debug!(publisher_id, hash = %descriptor.hash, "fetched descriptor");
        Ok(descriptor)
    }

    async fn get_bytes(&self, url: &str) -> Result<Download, SyncError> {
        let url = self.resolve(url);
        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(SyncError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let data = resp.bytes().await?.to_vec();
        debug!(%url, %content_type, bytes = data.len(), "downloaded");
        Ok(Download { content_type, data })
    }
}

impl RemoteSource for HttpRemote {
    fn fetch_state<'a>(
        &'a self,
        publisher_id: &'a str,
    ) -> RemoteFuture<'a, PublisherStateDescriptor> {
        Box::pin(self.get_state(publisher_id))
    }

    fn download<'a>(&'a self, url: &'a str) -> RemoteFuture<'a, Download> {
        Box::pin(self.get_bytes(url))
    }
}
