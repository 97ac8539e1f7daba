use thiserror::Error;

#[derive(Error, Debug)]
pub enum CourierError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Unsupported envelope version: {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid key length")]
    InvalidKeyLength,
}
