//! HTTP error mapping
//!
//! Client mistakes become 400 with their message; everything else becomes a
//! generic 500 and the details only go to the log.

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::error;

use crate::vision::VisionError;

/// Errors returned by route handlers
#[derive(Debug, Error)]
pub enum ApiError {
    /// Undecodable image, bad base64, missing or malformed upload
    #[error("{0}")]
    BadRequest(String),

    /// Request body over the upload limit
    #[error("{0}")]
    PayloadTooLarge(String),

    /// Inference failure, worker panic, anything else
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<VisionError> for ApiError {
    fn from(e: VisionError) -> Self {
        match e {
            VisionError::InvalidImage(message) => ApiError::BadRequest(message),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<JoinError> for ApiError {
    fn from(e: JoinError) -> Self {
        if e.is_panic() {
            ApiError::Internal("worker panicked".to_string())
        } else {
            ApiError::Internal(e.to_string())
        }
    }
}

impl ApiError {
    /// Client-side extractor failure; keeps 413 for oversized bodies
    fn rejected(status: StatusCode, message: String) -> Self {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(message)
        } else {
            ApiError::BadRequest(message)
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::rejected(e.status(), e.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(e: MultipartRejection) -> Self {
        ApiError::rejected(e.status(), e.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::rejected(e.status(), e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::PayloadTooLarge(message) => (StatusCode::PAYLOAD_TOO_LARGE, message),
            ApiError::Internal(details) => {
                error!("Request failed: {}", details);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "ok": false, "error": message }))).into_response()
    }
}
