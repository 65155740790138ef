use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use jejak_audit::AuditError;

/// Errors that can occur when running the Jejak server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. binding the listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An audit pipeline or store error surfaced through the API.
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    /// Queue statistics were requested while running in direct-write mode.
    #[error("queue unavailable")]
    QueueUnavailable,

    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::QueueUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::Audit(AuditError::InvalidConfig(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::Config(_) | Self::Io(_) | Self::Audit(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &self {
            Self::NotFound(msg) | Self::BadRequest(msg) => msg.clone(),
            other => other.to_string(),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}
