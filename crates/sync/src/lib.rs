//! Content-addressed wallpaper synchronization for Wallstream agents.
//!
//! A [`SyncEngine`] runs one role per process:
//! - **subscriber**: polls the server for a publisher's descriptor, downloads
//!   and caches changed wallpapers, applies them through a [`WallpaperPort`].
//! - **publisher**: hashes the local wallpaper on every tick, caches changes
//!   and hands them to an optional [`Uploader`].
//!
//! Progress survives restarts through the [`AgentState`] file.

mod engine;
mod remote;
mod state;
mod upload;
mod wallpaper;

pub use engine::{Mode, Phase, SyncEngine, TickOutcome};
pub use remote::{Download, HttpRemote, RemoteFuture, RemoteSource};
pub use state::{AgentState, STATE_FILE_NAME, StateError, StateManager};
pub use upload::{HttpUploader, UploadError, UploadFuture, Uploader};
pub use wallpaper::{WallpaperError, WallpaperPort};

use wallstream_content_store::StoreError;

/// Default poll interval and HTTP timeout.
pub const DEFAULT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);

/// Errors produced by a sync tick. None of them are fatal to the agent.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("not an image (content type {0:?})")]
    NotImage(String),

    #[error("downloaded body is empty")]
    EmptyBody,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache error: {0}")]
    Store(#[from] StoreError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("wallpaper error: {0}")]
    Wallpaper(#[from] WallpaperError),

    #[error("upload error: {0}")]
    Upload(#[from] UploadError),
}
