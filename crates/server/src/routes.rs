use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;
use wallstream_content_store::{hash_bytes, hash_file, is_valid_digest};
use wallstream_protocol::media::{
    FALLBACK_EXT, content_type_for_ext, ext_for_content_type, is_image_content_type,
    normalize_ext,
};
use wallstream_protocol::{
    MessageResponse, PublishRequest, PublishedWallpaper, PublisherDevice,
    PublisherStateDescriptor, RegisterDeviceRequest, UploadResponse, unix_timestamp,
};

use crate::error::AppError;
use crate::principal::Principal;
use crate::state::AppState;

const MAX_DEVICE_ID_LEN: usize = 128;

/// Assembles the router with tracing and the upload body limit.
pub fn app(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/state/{publisher_id}", get(get_state))
        .route("/files/{filename}", get(serve_file))
        .route("/api/files/upload", post(upload_file))
        .route(
            "/api/publisher/devices",
            post(register_device).get(list_devices),
        )
        .route("/api/publisher/wallpaper", post(publish_wallpaper))
        .route("/api/publisher/wallpaper/{device_id}", get(list_wallpapers))
        .route(
            "/api/publisher/wallpaper/{device_id}/{hash}",
            delete(retract_wallpaper),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn get_state(
    State(state): State<AppState>,
    Path(publisher_id): Path<String>,
) -> Result<Json<PublisherStateDescriptor>, AppError> {
    state
        .states
        .get(&publisher_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no wallpaper published for {publisher_id}")))
}

async fn serve_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (hash, ext) =
        split_filename(&filename).ok_or_else(|| AppError::NotFound("file not found".into()))?;
    let path = state.uploads.entry_path(hash, ext)?;

    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound("file not found".into()));
        }
        Err(e) => return Err(AppError::Internal(e.to_string())),
    };
    Ok(([(CONTENT_TYPE, content_type_for_ext(ext))], data))
}

async fn upload_file(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>, AppError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !is_image_content_type(content_type) {
        return Err(AppError::UnsupportedMediaType(format!(
            "expected an image, got {content_type:?}"
        )));
    }
    let ext = ext_for_content_type(content_type);
    if ext == FALLBACK_EXT {
        return Err(AppError::UnsupportedMediaType(format!(
            "unsupported image type {content_type:?}"
        )));
    }
    if body.is_empty() {
        return Err(AppError::BadRequest("empty upload".into()));
    }

    let bytes = body.len();
    let hash = hash_bytes(&body);
    let store = state.uploads.clone();
    let key = hash.clone();
    tokio::task::spawn_blocking(move || store.save(&body, &key, ext)).await??;

    info!(user = %principal.username, %hash, bytes, "upload stored");
    Ok(Json(UploadResponse {
        filename: format!("{hash}.{ext}"),
    }))
}

async fn publish_wallpaper(
    State(state): State<AppState>,
    principal: Principal,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(req) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let (name_hash, ext) = split_filename(&req.filename)
        .ok_or_else(|| AppError::BadRequest(format!("invalid filename {:?}", req.filename)))?;

    let path = state.uploads.entry_path(name_hash, ext)?;
    if !state.uploads.exists(&path) {
        return Err(AppError::NotFound("uploaded file not found".into()));
    }

    let digest = tokio::task::spawn_blocking(move || hash_file(&path)).await??;
    if !digest.eq_ignore_ascii_case(name_hash) {
        error!(filename = %req.filename, %digest, "stored upload does not match its name");
        return Err(AppError::Internal(format!(
            "stored upload {} hashes to {digest}",
            req.filename
        )));
    }

    let url = state.file_url(&format!("{digest}.{ext}"));
    state
        .guard
        .publish(&principal, &req.device_id, &digest, &url)
        .await?;

    Ok(Json(MessageResponse {
        message: "wallpaper published".into(),
    }))
}

async fn register_device(
    State(state): State<AppState>,
    principal: Principal,
    body: Result<Json<RegisterDeviceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PublisherDevice>), AppError> {
    let Json(req) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let device_id = req.device_id.trim();
    if !is_valid_device_id(device_id) {
        return Err(AppError::BadRequest(format!(
            "invalid device id {device_id:?}"
        )));
    }

    let now = unix_timestamp();
    let device = state
        .devices
        .create(PublisherDevice {
            id: Uuid::new_v4().to_string(),
            user_id: principal.user_id.clone(),
            device_id: device_id.to_string(),
            created_at: now,
            updated_at: now,
        })
        .await?;

    info!(user = %principal.username, device_id, "device registered");
    Ok((StatusCode::CREATED, Json(device)))
}

async fn list_devices(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<PublisherDevice>>, AppError> {
    Ok(Json(state.devices.list_by_user(&principal.user_id).await?))
}

async fn list_wallpapers(
    State(state): State<AppState>,
    principal: Principal,
    Path(device_id): Path<String>,
) -> Result<Json<Vec<PublishedWallpaper>>, AppError> {
    Ok(Json(state.guard.records(&principal, &device_id).await?))
}

async fn retract_wallpaper(
    State(state): State<AppState>,
    principal: Principal,
    Path((device_id, hash)): Path<(String, String)>,
) -> Result<Json<MessageResponse>, AppError> {
    state.guard.retract(&principal, &device_id, &hash).await?;
    Ok(Json(MessageResponse {
        message: "wallpaper removed".into(),
    }))
}

/// Splits `<sha256>.<ext>` for the extensions the server stores.
fn split_filename(filename: &str) -> Option<(&str, &str)> {
    let (hash, ext) = filename.rsplit_once('.')?;
    if !is_valid_digest(hash) || ext == FALLBACK_EXT || normalize_ext(ext) != ext {
        return None;
    }
    Some((hash, ext))
}

fn is_valid_device_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_DEVICE_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn filenames_must_be_digest_and_known_ext() {
        assert_eq!(
            split_filename(&format!("{HASH}.jpg")),
            Some((HASH, "jpg"))
        );
        assert!(split_filename(&format!("{HASH}.png")).is_some());
        assert!(split_filename(&format!("{HASH}.bin")).is_none());
        assert!(split_filename(&format!("{HASH}.jpeg")).is_none());
        assert!(split_filename(&format!("{HASH}.JPG")).is_none());
        assert!(split_filename("abcd.jpg").is_none());
        assert!(split_filename(HASH).is_none());
        assert!(split_filename("../../etc/passwd").is_none());
    }

    #[test]
    fn device_id_rules() {
        assert!(is_valid_device_id("desk-1"));
        assert!(is_valid_device_id("my.host_name"));
        assert!(!is_valid_device_id(""));
        assert!(!is_valid_device_id("a/b"));
        assert!(!is_valid_device_id("has space"));
        assert!(!is_valid_device_id(&"x".repeat(MAX_DEVICE_ID_LEN + 1)));
    }
}
