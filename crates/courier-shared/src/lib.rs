//! # courier-shared
//!
//! Types and primitives shared by the store and the server: the message
//! data model, the encrypted envelope, stream frames and the enrichment
//! pipeline.

pub mod constants;
pub mod crypto;
pub mod enrich;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{CourierError, CryptoError};
