//! Error types for Kindling
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
///
/// This enum represents all possible errors that can occur
/// in the application. It implements `IntoResponse` to
/// automatically convert errors to appropriate HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Signature verification failed for a request that carried one (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Access denied (403)
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// Signing key identifier is not a well-formed key URL (401)
    #[error("Invalid key id: {0}")]
    InvalidKeyId(String),

    /// Stored public key material could not be decoded (500)
    #[error("Malformed public key: {0}")]
    MalformedKey(String),

    /// Remote peer could not be reached (502)
    #[error("Remote unreachable: {0}")]
    Unreachable(String),

    /// Remote document could not be decoded (502)
    #[error("Malformed remote document: {0}")]
    Malformed(String),

    /// Network operation was cancelled or exceeded its deadline (504)
    #[error("Operation cancelled or timed out")]
    Cancelled,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    /// Map outbound HTTP failures onto the federation error kinds.
    ///
    /// Timeouts count as cancellation so that a request-scoped deadline
    /// and a client-level timeout surface the same way to callers.
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Cancelled
        } else if err.is_decode() {
            AppError::Malformed(err.to_string())
        } else {
            AppError::Unreachable(err.to_string())
        }
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each error variant to appropriate HTTP status code
    /// and JSON error body.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, error_message, error_type) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string(), "not_found"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string(), "unauthorized"),
            AppError::InvalidKeyId(msg) => {
                (StatusCode::UNAUTHORIZED, msg.clone(), "invalid_key_id")
            }
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone(), "forbidden"),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), "validation"),
            AppError::Unreachable(msg) => (StatusCode::BAD_GATEWAY, msg.clone(), "unreachable"),
            AppError::Malformed(msg) => (StatusCode::BAD_GATEWAY, msg.clone(), "malformed"),
            AppError::Cancelled => (StatusCode::GATEWAY_TIMEOUT, self.to_string(), "cancelled"),
            AppError::MalformedKey(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Malformed key".to_string(),
                "malformed_key",
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                "database",
            ),
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), "config"),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                "internal",
            ),
        };

        // Record error metric
        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL
            .with_label_values(&[error_type, "unknown"])
            .inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
