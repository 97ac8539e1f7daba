//! Priority-ordered enrichment pipeline.
//!
//! A [`Pipeline`] holds processor descriptors sorted once, at registration,
//! by descending priority (ties keep registration order). `process` threads
//! a fresh [`EnrichedMessage`] through every processor; each one only appends
//! findings, so a later processor sees everything earlier ones produced.

mod codes;
mod emoji;
mod links;
mod mentions;

use std::sync::Arc;

use crate::types::{EnrichedMessage, Message, Participant};

pub use codes::CodeDetector;
pub use emoji::EmojiOnlyDetector;
pub use links::LinkDetector;
pub use mentions::MentionDetector;

/// Conversation facts a processor may consult. Never mutated by processors.
#[derive(Debug, Clone, Default)]
pub struct EnrichContext {
    pub participants: Vec<Participant>,
}

/// A pure, total transform over an enriched message.
///
/// Implementations must not remove findings added upstream. A processor
/// with nothing to add returns its input unchanged.
pub trait Processor: Send + Sync {
    fn apply(&self, message: EnrichedMessage, ctx: &EnrichContext) -> EnrichedMessage;
}

#[derive(Clone)]
pub struct ProcessorDescriptor {
    pub id: String,
    pub priority: i32,
    processor: Arc<dyn Processor>,
}

impl ProcessorDescriptor {
    pub fn new(id: impl Into<String>, priority: i32, processor: impl Processor + 'static) -> Self {
        Self {
            id: id.into(),
            priority,
            processor: Arc::new(processor),
        }
    }
}

impl std::fmt::Debug for ProcessorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorDescriptor")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    processors: Vec<ProcessorDescriptor>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline with every built-in processor registered.
    pub fn with_defaults() -> Self {
        let mut pipeline = Self::new();
        pipeline.register(ProcessorDescriptor::new("codes", 100, CodeDetector::new()));
        pipeline.register(ProcessorDescriptor::new("links", 80, LinkDetector::new()));
        pipeline.register(ProcessorDescriptor::new("mentions", 50, MentionDetector::new()));
        pipeline.register(ProcessorDescriptor::new("emoji", 10, EmojiOnlyDetector));
        pipeline
    }

    pub fn register(&mut self, descriptor: ProcessorDescriptor) {
        self.processors.push(descriptor);
        // Stable sort: equal priorities keep registration order.
        self.processors.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Processor ids in execution order.
    pub fn order(&self) -> Vec<&str> {
        self.processors.iter().map(|d| d.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn process(&self, message: Message) -> EnrichedMessage {
        self.process_in(message, &EnrichContext::default())
    }

    pub fn process_in(&self, message: Message, ctx: &EnrichContext) -> EnrichedMessage {
        self.processors
            .iter()
            .fold(EnrichedMessage::new(message), |acc, d| {
                d.processor.apply(acc, ctx)
            })
    }
}

/// Convert a regex byte range into the char offsets clients expect.
pub(crate) fn char_span(text: &str, start: usize, end: usize) -> (usize, usize) {
    let s = text[..start].chars().count();
    let e = s + text[start..end].chars().count();
    (s, e)
}
