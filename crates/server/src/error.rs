//! API error types.

use crate::burn::BurnError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pyre_metadata::MetadataError;
use pyre_storage::StorageError;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("{0}")]
    Core(#[from] pyre_core::Error),

    #[error("burn error: {0}")]
    Burn(#[from] BurnError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::PreconditionFailed(_) => "precondition_failed",
            Self::Storage(e) => match e {
                StorageError::TooLarge { .. } => "payload_too_large",
                StorageError::InvalidInput(_) => "bad_request",
                _ => "storage_error",
            },
            Self::Metadata(e) => match e {
                MetadataError::AlreadyExists(_) => "conflict",
                MetadataError::Serialization(_) => "data_invalid",
                _ => "metadata_error",
            },
            Self::Core(_) => "bad_request",
            Self::Burn(e) => match e {
                BurnError::QueueFull | BurnError::Closed => "burn_unavailable",
                BurnError::Failed(_) => "burn_failed",
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Self::Storage(e) => match e {
                StorageError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                StorageError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                // Unreadable records are indistinguishable from missing ones.
                MetadataError::Serialization(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
            Self::Burn(e) => match e {
                BurnError::QueueFull | BurnError::Closed => StatusCode::SERVICE_UNAVAILABLE,
                BurnError::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
