//! Auth gate: every route except `/health` needs the shared secret.

use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use courier_shared::constants::SECRET_HEADER;

use crate::api::AppState;
use crate::error::ServerError;

/// Constant-time comparison of a presented secret against the configured one.
pub fn authenticate(presented: &str, expected: &str) -> bool {
    let presented = presented.as_bytes();
    let expected = expected.as_bytes();
    presented.len() == expected.len() && presented.ct_eq(expected).unwrap_u8() == 1
}

fn header_secret(headers: &HeaderMap) -> Option<&str> {
    if let Some(auth) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(token.trim());
        }
    }
    headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok())
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

pub async fn require_secret(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let path = req.uri().path();
    if path == "/health" {
        return Ok(next.run(req).await);
    }

    let mut presented = header_secret(req.headers()).map(str::to_owned);
    // Browsers cannot set headers on a WebSocket handshake.
    if presented.is_none() && path == "/stream" {
        presented = Query::<TokenQuery>::try_from_uri(req.uri())
            .ok()
            .and_then(|Query(q)| q.token);
    }

    match presented {
        Some(secret) if authenticate(&secret, &state.config.secret) => Ok(next.run(req).await),
        _ => {
            tracing::warn!(path, "rejected unauthenticated request");
            Err(ServerError::Unauthorized)
        }
    }
}
