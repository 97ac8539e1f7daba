use super::{EnrichContext, Processor};
use crate::types::EnrichedMessage;

/// Messages with more emoji than this render as normal text.
const MAX_EMOJI: usize = 12;

/// Flags messages made only of emoji (plus whitespace and joiners).
#[derive(Debug, Default)]
pub struct EmojiOnlyDetector;

impl Processor for EmojiOnlyDetector {
    fn apply(&self, mut message: EnrichedMessage, _ctx: &EnrichContext) -> EnrichedMessage {
        if is_emoji_only(message.text()) {
            message.emoji_only = true;
        }
        message
    }
}

fn is_emoji_only(text: &str) -> bool {
    let mut pictographs = 0usize;
    for c in text.trim().chars() {
        if is_pictograph(c) {
            pictographs += 1;
        } else if !(c.is_whitespace() || is_emoji_component(c)) {
            return false;
        }
    }
    (1..=MAX_EMOJI).contains(&pictographs)
}

fn is_pictograph(c: char) -> bool {
    matches!(c as u32,
        0x1F000..=0x1FAFF   // mahjong .. symbols & pictographs ext-A
        | 0x2600..=0x27BF   // misc symbols, dingbats
        | 0x2300..=0x23FF   // misc technical (watch, hourglass)
        | 0x2B00..=0x2BFF   // arrows, stars
        | 0x2190..=0x21FF   // arrows
        | 0x3030 | 0x303D | 0x3297 | 0x3299
        | 0x00A9 | 0x00AE | 0x203C | 0x2049 | 0x2122 | 0x2139
    ) && !is_emoji_component(c)
}

/// Code points that only modify or join pictographs.
fn is_emoji_component(c: char) -> bool {
    matches!(c as u32,
        0x200D              // zero width joiner
        | 0xFE0E | 0xFE0F   // variation selectors
        | 0x20E3            // combining keycap
        | 0x1F3FB..=0x1F3FF // skin tone modifiers
        | 0xE0020..=0xE007F // tag sequences
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::message;

    fn emoji_only(text: &str) -> bool {
        EmojiOnlyDetector
            .apply(
                EnrichedMessage::new(message(1, text)),
                &EnrichContext::default(),
            )
            .emoji_only
    }

    #[test]
    fn test_emoji_only() {
        assert!(emoji_only("😂"));
        assert!(emoji_only(" 👍🏽 ❤️ "));
        assert!(emoji_only("👨‍👩‍👧"));
        assert!(emoji_only("🇺🇸"));
    }

    #[test]
    fn test_mixed_or_empty_is_not_emoji_only() {
        assert!(!emoji_only("ok 👍"));
        assert!(!emoji_only(""));
        assert!(!emoji_only("   "));
        assert!(!emoji_only(&"🔥".repeat(MAX_EMOJI + 1)));
    }
}
