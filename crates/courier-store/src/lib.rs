//! # courier-store
//!
//! Read-only access to the host message store (a SQLite database written by
//! another process), plus the synchronization cursor and diff engine that
//! turn its growth into change events.
//!
//! Everything here is synchronous. Callers on an async runtime run queries
//! through `spawn_blocking`.

pub mod attachments;
pub mod conversations;
pub mod database;
pub mod diff;
pub mod messages;
pub mod schema;
pub mod timestamps;
pub mod watermark;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

mod error;

pub use attachments::AttachmentFile;
pub use database::Database;
pub use diff::{DiffBatch, DiffEngine, StoreChange};
pub use error::StoreError;
pub use messages::MAX_BATCH;
pub use watermark::Watermark;
