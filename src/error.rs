use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub type ThrottleResult<T> = Result<T, ThrottleError>;

/// Retry hint used when a bucket will never refill on its own.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ThrottleError {
    #[error("capacity must be greater than 0")]
    InvalidCapacity,

    #[error("refill rate must be finite and non-negative, got {0}")]
    InvalidRefillRate(f64),

    #[error("rate limit key cannot be empty")]
    EmptyKey,

    /// Raised by the HTTP layer when a guarded route is denied admission.
    #[error("{message}")]
    RateLimitExceeded {
        message: String,
        retry_after: Duration,
        path: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ThrottleError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ThrottleError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub timestamp: u64,
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, message: &str, path: &str) -> Self {
        Self {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            status: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Unknown").to_string(),
            message: message.to_string(),
            path: path.to_string(),
        }
    }

    pub fn from_error(err: &ThrottleError) -> Self {
        let status = err.status_code();
        match err {
            ThrottleError::RateLimitExceeded { message, path, .. } => {
                Self::new(status, message, path)
            }
            // Internal details stay in the logs.
            _ => Self::new(status, "An unexpected error occurred", "unknown"),
        }
    }
}

/// Whole seconds for a `Retry-After` header, rounded up and never zero.
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for ThrottleError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_error(&self);
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let mut response = (status, Json(body)).into_response();
        if let ThrottleError::RateLimitExceeded { retry_after, .. } = &self {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs(*retry_after)),
            );
        }
        response
    }
}
