//! API error type rendered as `{ "error": message }`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use wallstream_content_store::StoreError;
use wallstream_protocol::ErrorResponse;

use crate::guard::PublishError;
use crate::repository::RepoError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    UnsupportedMediaType(String),

    /// Logged, never shown to the client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Internal(_) => {
                tracing::error!(error = %self, "internal server error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (self.status(), Json(ErrorResponse::new(message))).into_response()
    }
}

impl From<PublishError> for AppError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Duplicate => Self::Conflict(err.to_string()),
            PublishError::UnknownDevice(_) | PublishError::NotPublished => {
                Self::NotFound(err.to_string())
            }
            PublishError::NotOwner(_) => Self::Forbidden(err.to_string()),
            PublishError::InvalidHash(_) => Self::BadRequest(err.to_string()),
            PublishError::Repo(e) => e.into(),
        }
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::AlreadyExists(_) => Self::Conflict(err.to_string()),
            RepoError::Storage(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidKey(_) => Self::BadRequest(err.to_string()),
            StoreError::Io(_) | StoreError::NoCacheDir => Self::Internal(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(err.to_string())
    }
}
