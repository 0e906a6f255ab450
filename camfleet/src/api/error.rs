//! API error handling.
//!
//! Every failure leaves the API as `{code, message}`. Client errors carry the
//! domain message; server errors are logged here and answered with a generic
//! message.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::Error;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a 400 Bad Request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Create a 404 Not Found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Create a 409 Conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// Create a 500 Internal Server Error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::UnreachableDevice { .. } => {
                ApiError::new(StatusCode::BAD_REQUEST, "UNREACHABLE_DEVICE", message)
            }
            Error::RtspNotFound { .. } => {
                ApiError::new(StatusCode::BAD_REQUEST, "RTSP_NOT_FOUND", message)
            }
            Error::MissingParameter(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "MISSING_PARAMETER", message)
            }
            Error::StreamNotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "STREAM_NOT_FOUND", message)
            }
            Error::CapacityExceeded { .. } => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "CAPACITY_EXCEEDED", message)
            }
            Error::WorkerAlreadyRunning { .. } | Error::InvalidStateTransition { .. } => {
                ApiError::conflict(message)
            }
            Error::Configuration(msg) => ApiError::bad_request(msg),
            Error::StartupTimeout { .. } => {
                tracing::error!("{}", message);
                ApiError::new(
                    StatusCode::GATEWAY_TIMEOUT,
                    "STARTUP_TIMEOUT",
                    "The stream did not become ready in time",
                )
            }
            Error::ProcessSpawn { .. } | Error::WorkerCrashed { .. } => {
                tracing::error!("Worker error: {}", message);
                ApiError::internal("An unexpected error occurred")
            }
            Error::Io(_) | Error::IoPath { .. } => {
                tracing::error!("IO error: {}", message);
                ApiError::internal("IO error occurred")
            }
            Error::Other(_) => {
                tracing::error!("Unexpected error: {}", message);
                ApiError::internal("An unexpected error occurred")
            }
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
