//! Data model relayed to clients.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! straight to the REST and stream boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single message as recorded by the host store. Never mutated after it
/// has been read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Store-assigned row id. Strictly increasing in insertion order; this is
    /// the synchronization and dedup key.
    pub id: i64,
    /// Stable external identifier.
    pub guid: String,
    pub text: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub is_from_me: bool,
    /// Handle address of the sender. `None` for outbound messages.
    pub sender: Option<String>,
    /// Guid of the owning conversation.
    pub conversation_id: String,
    pub service: Option<String>,
    pub is_read: bool,
    pub edited_at: Option<DateTime<Utc>>,
    /// Set for tapbacks: the message this one reacts to.
    pub association: Option<Association>,
    pub attachments: Vec<AttachmentRef>,
}

/// Link from a tapback row to the message it targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Association {
    pub target_guid: String,
    pub reaction: Reaction,
    /// `false` when the row retracts an earlier tapback.
    pub added: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    Love,
    Like,
    Dislike,
    Laugh,
    Emphasize,
    Question,
}

impl Reaction {
    /// Map the store's `associated_message_type` to a reaction.
    ///
    /// 2000..=2005 add a tapback, 3000..=3005 remove the matching one.
    pub fn from_associated_type(kind: i64) -> Option<(Self, bool)> {
        let (base, added) = match kind {
            2000..=2005 => (kind - 2000, true),
            3000..=3005 => (kind - 3000, false),
            _ => return None,
        };
        let reaction = match base {
            0 => Self::Love,
            1 => Self::Like,
            2 => Self::Dislike,
            3 => Self::Laugh,
            4 => Self::Emphasize,
            _ => Self::Question,
        };
        Some((reaction, added))
    }
}

/// Attachment metadata. The on-disk path stays inside the store layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentRef {
    pub id: i64,
    pub guid: String,
    pub transfer_name: Option<String>,
    pub mime_type: Option<String>,
    pub total_bytes: i64,
}

impl AttachmentRef {
    pub fn is_image(&self) -> bool {
        self.mime_type
            .as_deref()
            .is_some_and(|m| m.starts_with("image/"))
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub address: String,
    pub service: Option<String>,
}

/// Read-only projection of a chat in the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    pub chat_identifier: String,
    pub display_name: Option<String>,
    pub service: Option<String>,
    pub participants: Vec<Participant>,
    pub last_message: Option<Message>,
    pub is_group: bool,
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectedCode {
    pub value: String,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HighlightKind {
    Code,
    Url,
    Email,
    Phone,
    Mention,
}

/// A highlighted span of the message text. Offsets count characters, not
/// bytes, and are half-open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Highlight {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub kind: HighlightKind,
}

impl Highlight {
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mention {
    pub text: String,
    pub participant: Option<Participant>,
}

/// A message plus everything the enrichment pipeline derived from it.
///
/// Built fresh for every delivery and dropped after serialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnrichedMessage {
    pub message: Message,
    pub codes: Vec<DetectedCode>,
    pub highlights: Vec<Highlight>,
    pub mentions: Vec<Mention>,
    pub emoji_only: bool,
}

impl EnrichedMessage {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            codes: Vec::new(),
            highlights: Vec::new(),
            mentions: Vec::new(),
            emoji_only: false,
        }
    }

    pub fn text(&self) -> &str {
        self.message.text.as_deref().unwrap_or("")
    }

    /// Whether `[start, end)` is free of any existing highlight.
    pub fn is_unclaimed(&self, start: usize, end: usize) -> bool {
        !self.highlights.iter().any(|h| h.overlaps(start, end))
    }
}
