//! Stream protocol frames.
//!
//! Every frame on the wire is a JSON object `{type, data}`. On connections
//! that opted into envelopes, `data` is replaced by an [`EncryptedEnvelope`]
//! while `type` stays readable; that wrapping point never changes for the
//! lifetime of a connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::{EncryptedEnvelope, EnvelopeCipher};
use crate::error::{CourierError, CryptoError};
use crate::types::{EnrichedMessage, Message, Reaction};

/// Server → client events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    NewMessage(EnrichedMessage),
    MessageUpdated(EnrichedMessage),
    TapbackAdded(TapbackPayload),
    TapbackRemoved(TapbackPayload),
    Pong,
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TapbackPayload {
    pub message: Message,
    pub target_guid: String,
    pub reaction: Reaction,
}

/// Client → server signals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientSignal {
    Ping,
    Typing {
        conversation_id: String,
        #[serde(default)]
        active: bool,
    },
    MarkRead {
        conversation_id: String,
    },
}

/// Raw `{type, data}` frame before the `type`-specific payload is interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Frame {
    fn from_tagged<T: Serialize>(value: &T) -> Result<Self, CourierError> {
        Ok(serde_json::from_value(serde_json::to_value(value)?)?)
    }

    fn into_tagged<T: for<'de> Deserialize<'de>>(self) -> Result<T, CourierError> {
        let mut obj = serde_json::Map::new();
        obj.insert("type".to_string(), Value::String(self.kind));
        if !self.data.is_null() {
            obj.insert("data".to_string(), self.data);
        }
        Ok(serde_json::from_value(Value::Object(obj))?)
    }

    /// Replace `data` with its sealed envelope. Frames without data stay as-is.
    fn seal(mut self, cipher: &EnvelopeCipher) -> Result<Self, CourierError> {
        if !self.data.is_null() {
            let envelope = cipher.seal_json(&self.data)?;
            self.data = serde_json::to_value(envelope)?;
        }
        Ok(self)
    }

    fn open(mut self, cipher: &EnvelopeCipher) -> Result<Self, CourierError> {
        if self.data.is_null() {
            return Ok(self);
        }
        let envelope: EncryptedEnvelope = serde_json::from_value(self.data)
            .map_err(|_| CourierError::Crypto(CryptoError::DecryptionFailed))?;
        let plain = cipher.decrypt(&envelope)?;
        self.data = serde_json::from_slice(&plain)?;
        Ok(self)
    }
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new-message",
            Self::MessageUpdated(_) => "message-updated",
            Self::TapbackAdded(_) => "tapback-added",
            Self::TapbackRemoved(_) => "tapback-removed",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }

    /// Serialize to the text frame sent on a connection, sealing `data`
    /// when the connection carries a cipher.
    pub fn to_wire(&self, cipher: Option<&EnvelopeCipher>) -> Result<String, CourierError> {
        let frame = Frame::from_tagged(self)?;
        let frame = match cipher {
            Some(cipher) => frame.seal(cipher)?,
            None => frame,
        };
        Ok(serde_json::to_string(&frame)?)
    }

    /// Inverse of [`ServerEvent::to_wire`]; what a client does with a frame.
    pub fn from_wire(text: &str, cipher: Option<&EnvelopeCipher>) -> Result<Self, CourierError> {
        decode_frame(text, cipher)
    }
}

impl ClientSignal {
    pub fn to_wire(&self, cipher: Option<&EnvelopeCipher>) -> Result<String, CourierError> {
        let frame = Frame::from_tagged(self)?;
        let frame = match cipher {
            Some(cipher) => frame.seal(cipher)?,
            None => frame,
        };
        Ok(serde_json::to_string(&frame)?)
    }

    /// Parse an inbound frame. On an encrypted connection any `data` must be
    /// an envelope; plaintext data is rejected rather than trusted.
    pub fn from_wire(text: &str, cipher: Option<&EnvelopeCipher>) -> Result<Self, CourierError> {
        decode_frame(text, cipher)
    }
}

fn decode_frame<T: for<'de> Deserialize<'de>>(
    text: &str,
    cipher: Option<&EnvelopeCipher>,
) -> Result<T, CourierError> {
    let frame: Frame = serde_json::from_str(text)?;
    let frame = match cipher {
        Some(cipher) => frame.open(cipher)?,
        None => frame,
    };
    frame.into_tagged()
}
