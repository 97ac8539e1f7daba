use std::sync::LazyLock;

use regex::Regex;

use super::{char_span, EnrichContext, Processor};
use crate::types::{EnrichedMessage, Highlight, HighlightKind, Mention, Participant};

static MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@[\p{L}\p{N}_][\p{L}\p{N}_.+-]*").expect("valid mention pattern")
});

/// Finds `@name` tokens and resolves them against the conversation's
/// participants. Tokens inside an upstream highlight (an email address,
/// a URL) are not mentions.
#[derive(Debug, Default)]
pub struct MentionDetector;

impl MentionDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Processor for MentionDetector {
    fn apply(&self, mut message: EnrichedMessage, ctx: &EnrichContext) -> EnrichedMessage {
        let text = message.text().to_string();
        if !text.contains('@') {
            return message;
        }

        for m in MENTION.find_iter(&text) {
            let preceded_by_word = text[..m.start()]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
            if preceded_by_word {
                continue;
            }

            let token = m.as_str().trim_end_matches(&['.', '-'][..]);
            let end = m.start() + token.len();
            let (cs, ce) = char_span(&text, m.start(), end);
            if !message.is_unclaimed(cs, ce) {
                continue;
            }

            let participant = resolve(&token[1..], &ctx.participants);
            message.highlights.push(Highlight {
                text: token.to_string(),
                start: cs,
                end: ce,
                kind: HighlightKind::Mention,
            });
            message.mentions.push(Mention {
                text: token.to_string(),
                participant,
            });
        }

        message
    }
}

fn resolve(name: &str, participants: &[Participant]) -> Option<Participant> {
    let name = name.to_lowercase();
    participants
        .iter()
        .find(|p| {
            let address = p.address.to_lowercase();
            let local = address.split('@').next().unwrap_or(&address);
            address == name || local == name
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::LinkDetector;
    use crate::types::fixtures::message;

    fn ctx() -> EnrichContext {
        EnrichContext {
            participants: vec![
                Participant {
                    address: "Alex@icloud.com".into(),
                    service: Some("iMessage".into()),
                },
                Participant {
                    address: "+15550001111".into(),
                    service: Some("SMS".into()),
                },
            ],
        }
    }

    #[test]
    fn test_resolves_by_local_part() {
        let out = MentionDetector::new().apply(
            EnrichedMessage::new(message(1, "hey @alex, look")),
            &ctx(),
        );
        assert_eq!(out.mentions.len(), 1);
        assert_eq!(out.mentions[0].text, "@alex");
        assert_eq!(
            out.mentions[0].participant.as_ref().map(|p| p.address.as_str()),
            Some("Alex@icloud.com")
        );
        assert_eq!(out.highlights[0].start, 4);
        assert_eq!(out.highlights[0].end, 9);
    }

    #[test]
    fn test_unknown_mention_unresolved() {
        let out = MentionDetector::new().apply(
            EnrichedMessage::new(message(1, "@jordan are you in?")),
            &ctx(),
        );
        assert_eq!(out.mentions.len(), 1);
        assert!(out.mentions[0].participant.is_none());
    }

    #[test]
    fn test_email_is_not_a_mention() {
        let ctx = ctx();
        let linked = LinkDetector::new().apply(
            EnrichedMessage::new(message(1, "write to sam@example.com")),
            &ctx,
        );
        let out = MentionDetector::new().apply(linked, &ctx);
        assert!(out.mentions.is_empty());
        assert_eq!(out.highlights.len(), 1);
        assert_eq!(out.highlights[0].kind, HighlightKind::Email);
    }
}
