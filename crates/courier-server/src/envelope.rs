//! REST envelope middleware.
//!
//! A request carrying `X-Courier-Encrypted: 1` must send its body (if any)
//! as an [`EncryptedEnvelope`], and gets every response body back as one.
//! A request envelope that cannot be opened is answered in plaintext: the
//! client evidently cannot build one, so it could not read one either.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};

use courier_shared::constants::ENCRYPTED_HEADER;
use courier_shared::crypto::EncryptedEnvelope;

use crate::api::AppState;
use crate::error::ServerError;

/// Largest request body accepted on any route.
pub const MAX_REQUEST_BODY: usize = 1024 * 1024;

pub fn wants_encryption(headers: &HeaderMap) -> bool {
    headers
        .get(ENCRYPTED_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "1" || v.trim().eq_ignore_ascii_case("true"))
}

pub async fn envelope_layer(State(state): State<AppState>, req: Request, next: Next) -> Response {
    // The stream negotiates its own wrapping during the handshake.
    let path = req.uri().path();
    if path == "/health" || path == "/stream" {
        return next.run(req).await;
    }

    if !wants_encryption(req.headers()) {
        if state.config.require_encryption {
            return ServerError::EncryptionRequired.into_response();
        }
        return next.run(req).await;
    }

    let req = match open_request(&state, req).await {
        Ok(req) => req,
        Err(e) => return e.into_response(),
    };

    let response = next.run(req).await;
    match seal_response(&state, response).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn open_request(state: &AppState, req: Request) -> Result<Request, ServerError> {
    let (mut parts, body) = req.into_parts();
    let bytes = to_bytes(body, MAX_REQUEST_BODY)
        .await
        .map_err(|e| ServerError::BadRequest(format!("unreadable body: {e}")))?;
    if bytes.is_empty() {
        return Ok(Request::from_parts(parts, Body::empty()));
    }

    let envelope: EncryptedEnvelope = serde_json::from_slice(&bytes)
        .map_err(|_| ServerError::BadRequest("body is not an encrypted envelope".into()))?;
    let plaintext = state.cipher.decrypt(&envelope).map_err(|e| {
        tracing::warn!(error = %e, "rejected request envelope");
        ServerError::BadRequest(e.to_string())
    })?;

    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Ok(Request::from_parts(parts, Body::from(plaintext)))
}

async fn seal_response(state: &AppState, response: Response) -> Result<Response, ServerError> {
    let (mut parts, body) = response.into_parts();
    let bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ServerError::Internal(format!("response body: {e}")))?;
    let envelope = state
        .cipher
        .encrypt(&bytes)
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    let json = serde_json::to_vec(&envelope).map_err(|e| ServerError::Internal(e.to_string()))?;

    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    parts
        .headers
        .insert(ENCRYPTED_HEADER, HeaderValue::from_static("1"));
    Ok(Response::from_parts(parts, Body::from(json)))
}
