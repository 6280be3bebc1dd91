use serde::{Deserialize, Serialize};

/// A publisher's current wallpaper, as served by `GET /state/{publisher_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherStateDescriptor {
    /// SHA-256 hex digest of the published image.
    pub hash: String,
    /// Where subscribers download the image from.
    pub url: String,
    /// Unix seconds when this wallpaper was published.
    #[serde(default)]
    pub timestamp: i64,
}

/// A wallpaper published by a device and persisted by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedWallpaper {
    pub id: String,
    pub user_id: String,
    pub device_id: String,
    pub hash: String,
    pub url: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A device registered as a publisher by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherDevice {
    pub id: String,
    pub user_id: String,
    pub device_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Body of `POST /api/publisher/wallpaper`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Name returned by the upload endpoint.
    pub filename: String,
    pub device_id: String,
}

/// Body of `POST /api/publisher/devices`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDeviceRequest {
    pub device_id: String,
}

/// Response of `POST /api/files/upload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub filename: String,
}

/// Generic success response carrying a human readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Error body returned by every failing API call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_field_names() {
        let json = r#"{"hash":"abc","url":"http://x/files/abc.jpg","timestamp":1700000000}"#;
        let d: PublisherStateDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.hash, "abc");
        assert_eq!(d.url, "http://x/files/abc.jpg");
        assert_eq!(d.timestamp, 1_700_000_000);
    }

    #[test]
    fn descriptor_timestamp_optional() {
        let d: PublisherStateDescriptor =
            serde_json::from_str(r#"{"hash":"abc","url":"u"}"#).unwrap();
        assert_eq!(d.timestamp, 0);
    }

    #[test]
    fn published_wallpaper_uses_snake_case() {
        let record = PublishedWallpaper {
            id: "id-1".into(),
            user_id: "user-1".into(),
            device_id: "desk".into(),
            hash: "h".into(),
            url: "u".into(),
            created_at: 1,
            updated_at: 2,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["user_id"], "user-1");
        assert_eq!(value["device_id"], "desk");
        assert_eq!(value["created_at"], 1);
        assert_eq!(value["updated_at"], 2);
    }

    #[test]
    fn error_response_shape() {
        let json = serde_json::to_string(&ErrorResponse::new("nope")).unwrap();
        assert_eq!(json, r#"{"error":"nope"}"#);
    }

    #[test]
    fn publish_request_parses() {
        let req: PublishRequest =
            serde_json::from_str(r#"{"filename":"a.jpg","device_id":"desk"}"#).unwrap();
        assert_eq!(req.filename, "a.jpg");
        assert_eq!(req.device_id, "desk");
    }
}
