//! Authenticated-encryption envelope.
//!
//! Every endpoint holding the shared secret derives the same 32-byte key with
//! HKDF-SHA256 (fixed salt and info label), so no key exchange takes place.
//! Payloads are sealed with XChaCha20-Poly1305 under a fresh random nonce and
//! shipped as `{version, payload}` where `payload = base64(nonce || ciphertext)`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::constants::{
    ENVELOPE_VERSION, KDF_INFO_ENVELOPE, KDF_SALT_ENVELOPE, NONCE_SIZE, SYMMETRIC_KEY_SIZE,
    TAG_SIZE,
};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];

/// Versioned container for authenticated ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    pub version: u32,
    pub payload: String,
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn derive_envelope_key(shared_secret: &[u8]) -> Result<SymmetricKey, CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(Some(KDF_SALT_ENVELOPE), shared_secret);
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    hkdf.expand(KDF_INFO_ENVELOPE, &mut key)
        .map_err(|_| CryptoError::InvalidKeyLength)?;
    Ok(key)
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Envelope sealer keyed once from the shared secret.
#[derive(Clone)]
pub struct EnvelopeCipher {
    key: SymmetricKey,
}

impl std::fmt::Debug for EnvelopeCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCipher").finish_non_exhaustive()
    }
}

impl EnvelopeCipher {
    pub fn from_secret(shared_secret: &str) -> Result<Self, CryptoError> {
        Ok(Self {
            key: derive_envelope_key(shared_secret.as_bytes())?,
        })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedEnvelope, CryptoError> {
        let sealed = encrypt(&self.key, plaintext)?;
        Ok(EncryptedEnvelope {
            version: ENVELOPE_VERSION,
            payload: STANDARD.encode(sealed),
        })
    }

    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> Result<Vec<u8>, CryptoError> {
        if envelope.version != ENVELOPE_VERSION {
            return Err(CryptoError::UnsupportedVersion(envelope.version));
        }
        let sealed = STANDARD
            .decode(envelope.payload.as_bytes())
            .map_err(|_| CryptoError::DecryptionFailed)?;
        decrypt(&self.key, &sealed)
    }

    /// Serialize `value` as JSON and seal it.
    pub fn seal_json<T: Serialize>(&self, value: &T) -> Result<EncryptedEnvelope, CryptoError> {
        let bytes = serde_json::to_vec(value).map_err(|_| CryptoError::EncryptionFailed)?;
        self.encrypt(&bytes)
    }
}
