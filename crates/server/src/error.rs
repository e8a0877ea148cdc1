//! Error types for expansion, submission and the HTTP API.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use populator_queue::QueueError;
use serde::Serialize;

/// Failure while expanding one upstream request job.
///
/// Reported to the queue store as a job failure; the store decides on redelivery.
#[derive(Debug, thiserror::Error)]
pub enum ExpansionError {
    #[error("invalid request payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("geometry error: {0}")]
    Geometry(populator_core::Error),

    #[error("tile enumeration error: {0}")]
    Enumeration(populator_core::Error),

    #[error("bulk insert failed after {flushed} tiles: {source}")]
    Flush {
        flushed: u64,
        #[source]
        source: QueueError,
    },
}

/// Failure to hand a request to the upstream queue.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Request already in queue")]
    Duplicate,

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SubmitError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<populator_core::Error> for SubmitError {
    fn from(err: populator_core::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Fatal consumer loop failure.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("queue store unavailable: {0}")]
    Queue(#[from] QueueError),
}

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
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Core(#[from] populator_core::Error),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Conflict(_) => "conflict",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) => "internal_error",
            Self::Core(e) if e.is_validation() => "bad_request",
            Self::Core(_) => "internal_error",
            Self::Queue(_) => "queue_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Core(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            Self::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Duplicate => Self::Conflict(SubmitError::Duplicate.to_string()),
            SubmitError::Queue(e) => Self::Queue(e),
            SubmitError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_maps_to_conflict() {
        let err = ApiError::from(SubmitError::Duplicate);
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "Request already in queue");
    }

    #[test]
    fn test_validation_errors_are_bad_requests() {
        let err = ApiError::from(populator_core::Error::InvalidZoomRange(
            "minZoom must be less than or equal to maxZoom".to_string(),
        ));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "bad_request");
        assert_eq!(
            err.to_string(),
            "minZoom must be less than or equal to maxZoom"
        );
    }

    #[test]
    fn test_queue_errors_are_internal() {
        let err = ApiError::from(SubmitError::Queue(QueueError::Internal("down".to_string())));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "queue_error");
    }
}
