use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use courier_store::StoreError;

use crate::host::HostError;

/// Client-facing text for host automation failures; details stay in the log.
pub const HOST_FAILED: &str = "Host automation failed";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Missing or invalid secret")]
    Unauthorized,

    #[error("Encryption required: send X-Courier-Encrypted: 1")]
    EncryptionRequired,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("Message store error: {0}")]
    Store(StoreError),

    #[error("Host automation error: {0}")]
    Host(#[from] HostError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServerError::NotFound("no such record".into()),
            other => ServerError::Store(other),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::EncryptionRequired => (StatusCode::UPGRADE_REQUIRED, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::UnsupportedMedia(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, self.to_string())
            }
            ServerError::Store(e) => {
                tracing::warn!(error = %e, "store query failed");
                (StatusCode::SERVICE_UNAVAILABLE, "Message store unavailable".to_string())
            }
            ServerError::Host(HostError::Unavailable) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ServerError::Host(e) => {
                tracing::warn!(error = %e, "host automation failed");
                (StatusCode::BAD_GATEWAY, HOST_FAILED.to_string())
            }
            ServerError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
