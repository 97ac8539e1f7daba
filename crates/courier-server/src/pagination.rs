//! Opaque page cursors.
//!
//! `o:<offset>` pages conversations; `b:<id>` is a keyset bound ("ids below
//! this") for message lists and search, which keeps pages stable while the
//! store keeps growing. Both travel as URL-safe base64.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Serialize;

use crate::error::ServerError;

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    Offset(u32),
    Before(i64),
}

impl Cursor {
    pub fn encode(&self) -> String {
        let raw = match self {
            Cursor::Offset(n) => format!("o:{n}"),
            Cursor::Before(id) => format!("b:{id}"),
        };
        URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(encoded: &str) -> Result<Self, ServerError> {
        let invalid = || ServerError::BadRequest("invalid cursor".into());
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .map_err(|_| invalid())?;
        let raw = String::from_utf8(bytes).map_err(|_| invalid())?;
        match raw.split_once(':') {
            Some(("o", n)) => n.parse().map(Cursor::Offset).map_err(|_| invalid()),
            Some(("b", id)) => id.parse().map(Cursor::Before).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }

    /// Offset from an optional cursor; keyset cursors are rejected.
    pub fn offset(cursor: Option<&str>) -> Result<u32, ServerError> {
        match cursor.map(Cursor::decode).transpose()? {
            None => Ok(0),
            Some(Cursor::Offset(n)) => Ok(n),
            Some(Cursor::Before(_)) => Err(ServerError::BadRequest("expected an offset cursor".into())),
        }
    }

    /// Keyset bound from an optional cursor; offset cursors are rejected.
    pub fn before(cursor: Option<&str>) -> Result<Option<i64>, ServerError> {
        match cursor.map(Cursor::decode).transpose()? {
            None => Ok(None),
            Some(Cursor::Before(id)) => Ok(Some(id)),
            Some(Cursor::Offset(_)) => Err(ServerError::BadRequest("expected a keyset cursor".into())),
        }
    }
}

pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Build a page from a query that fetched `limit + 1` rows; the extra
    /// row only signals that another page exists.
    pub fn from_overfetch(mut items: Vec<T>, limit: u32, next: impl FnOnce(&T) -> Cursor) -> Self {
        let more = items.len() > limit as usize;
        items.truncate(limit as usize);
        let next_cursor = if more {
            items.last().map(|last| next(last).encode())
        } else {
            None
        };
        Self { items, next_cursor }
    }
}
