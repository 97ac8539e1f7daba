/// Application name
pub const APP_NAME: &str = "Courier";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Envelope format version produced and accepted by this build
pub const ENVELOPE_VERSION: u32 = 1;

/// Key derivation parameters (HKDF-SHA256). Both ends derive the same key
/// from the shared secret, so these must never change within a version.
pub const KDF_SALT_ENVELOPE: &[u8] = b"courier-envelope-salt-v1";
pub const KDF_INFO_ENVELOPE: &[u8] = b"courier-envelope-key-v1";

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8787;

/// Header carrying the shared secret (alternative to `Authorization: Bearer`)
pub const SECRET_HEADER: &str = "x-courier-secret";

/// Header a client sets to opt into encrypted envelopes
pub const ENCRYPTED_HEADER: &str = "x-courier-encrypted";

/// Seconds between the Unix epoch and the Apple epoch (2001-01-01T00:00:00Z)
pub const APPLE_EPOCH_OFFSET_SECS: i64 = 978_307_200;
