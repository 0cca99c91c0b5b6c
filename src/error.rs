use std::time::Duration;

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tokio::task::JoinError;

pub type AppResult<T> = Result<T, AppError>;

pub const MISSING_IMAGE_MESSAGE: &str = "No image file uploaded.";
pub const ANNOTATION_FAILED_MESSAGE: &str =
    "Error analyzing image. Please check your API credentials.";

/// Failures of the label service, tagged by whether another attempt may succeed.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("network error talking to label service: {0}")]
    Network(#[from] reqwest::Error),
    #[error("label request timed out after {0:?}")]
    Timeout(Duration),
    #[error("label service quota exceeded ({status}): {message}")]
    RateLimited { status: u16, message: String },
    #[error("label service unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },
    #[error("label service rejected credentials ({status}): {message}")]
    Unauthorized { status: u16, message: String },
    #[error("invalid credentials: {0}")]
    Credentials(String),
    #[error("image rejected by label service: {0}")]
    InvalidImage(String),
    #[error("unexpected response from label service: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Transient,
    Permanent,
}

impl GatewayError {
    pub fn kind(&self) -> FaultKind {
        match self {
            GatewayError::Network(_)
            | GatewayError::Timeout(_)
            | GatewayError::RateLimited { .. }
            | GatewayError::Unavailable { .. } => FaultKind::Transient,
            GatewayError::Unauthorized { .. }
            | GatewayError::Credentials(_)
            | GatewayError::InvalidImage(_)
            | GatewayError::InvalidResponse(_) => FaultKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == FaultKind::Transient
    }

    /// Maps a non-success HTTP status from the label or token service.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => GatewayError::Unauthorized { status, message },
            429 => GatewayError::RateLimited { status, message },
            400 | 413 | 422 => GatewayError::InvalidImage(message),
            s if s >= 500 => GatewayError::Unavailable { status, message },
            _ => GatewayError::InvalidResponse(format!("status {status}: {message}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("no image file uploaded")]
    MissingImage,
    #[error("uploaded file exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("uploaded file is not a supported image")]
    UnsupportedImage,
    #[error("malformed multipart request: {0}")]
    Multipart(#[from] MultipartError),
    #[error("annotation failed: {0}")]
    Annotation(#[from] GatewayError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("background task failed: {0}")]
    Join(#[from] JoinError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MissingImage => StatusCode::BAD_REQUEST,
            AppError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UnsupportedImage => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::Multipart(err) => err.status(),
            AppError::Annotation(_) | AppError::Io(_) | AppError::Join(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::MissingImage => MISSING_IMAGE_MESSAGE.to_string(),
            AppError::TooLarge { limit } => {
                format!("Uploaded image is larger than the {limit} byte limit.")
            }
            AppError::UnsupportedImage => {
                "Uploaded file is not a supported image (JPEG, PNG, GIF, WebP, BMP, ICO, TIFF)."
                    .to_string()
            }
            AppError::Multipart(err) => err.body_text(),
            AppError::Annotation(_) => ANNOTATION_FAILED_MESSAGE.to_string(),
            AppError::Io(_) | AppError::Join(_) => "Internal server error.".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            AppError::Annotation(err) => {
                tracing::error!(error = %err, kind = ?err.kind(), "error processing image")
            }
            err if status.is_server_error() => tracing::error!(error = %err, "request failed"),
            err => tracing::debug!(error = %err, %status, "rejected request"),
        }
        (status, self.message()).into_response()
    }
}
