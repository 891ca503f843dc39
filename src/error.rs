//! Error types for llmgate.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for llmgate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for llmgate.
///
/// Every variant is resolved before or instead of an upstream call. Provider
/// responses with a non-2xx status are relayed as-is and never become an
/// `Error`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Quota exceeded")]
    QuotaExceeded,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::QuotaExceeded => StatusCode::PAYMENT_REQUIRED,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::Config(_) | Error::Internal(_) | Error::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::Unauthorized("Invalid API key".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(Error::QuotaExceeded.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(
            Error::BadRequest("Model is required".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::NotFound("No available channels for this token".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_into_response_is_plain_text() {
        let response = Error::QuotaExceeded.into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let content_type = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/plain"));
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"Quota exceeded");
    }
}
