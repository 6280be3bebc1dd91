//! Wire types shared by the Wallstream agent and server.
//!
//! JSON field names are snake_case on the wire.

pub mod media;
pub mod types;

pub use types::{
    ErrorResponse, MessageResponse, PublishRequest, PublishedWallpaper, PublisherDevice,
    PublisherStateDescriptor, RegisterDeviceRequest, UploadResponse,
};

/// Current time as unix seconds (0 if the clock is before the epoch).
pub fn unix_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
