//! URL, email and phone number highlighting.
//!
//! Runs after code detection: any span already highlighted upstream is left
//! alone, so a one-time code is never re-labelled as a phone number.

use std::sync::LazyLock;

use regex::Regex;

use super::{char_span, EnrichContext, Processor};
use crate::types::{EnrichedMessage, Highlight, HighlightKind};

static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>"']+"#).expect("valid url pattern")
});

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("valid email pattern")
});

static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{3}\)|\b\d{3})[\s.-]?\d{3}[\s.-]?\d{4}\b")
        .expect("valid phone pattern")
});

const TRAILING_PUNCT: &[char] = &['.', ',', '!', '?', ';', ':', ')', ']', '}'];

#[derive(Debug, Default)]
pub struct LinkDetector;

impl LinkDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Processor for LinkDetector {
    fn apply(&self, mut message: EnrichedMessage, _ctx: &EnrichContext) -> EnrichedMessage {
        let text = message.text().to_string();
        if text.is_empty() {
            return message;
        }

        for (pattern, kind) in [
            (&*URL, HighlightKind::Url),
            (&*EMAIL, HighlightKind::Email),
            (&*PHONE, HighlightKind::Phone),
        ] {
            for m in pattern.find_iter(&text) {
                let raw = m.as_str();
                let trimmed = if kind == HighlightKind::Url {
                    raw.trim_end_matches(TRAILING_PUNCT)
                } else {
                    raw
                };
                if trimmed.is_empty() {
                    continue;
                }
                let end = m.start() + trimmed.len();
                let (cs, ce) = char_span(&text, m.start(), end);
                if !message.is_unclaimed(cs, ce) {
                    continue;
                }
                message.highlights.push(Highlight {
                    text: trimmed.to_string(),
                    start: cs,
                    end: ce,
                    kind,
                });
            }
        }

        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::message;

    fn kinds(out: &EnrichedMessage) -> Vec<(HighlightKind, &str)> {
        out.highlights
            .iter()
            .map(|h| (h.kind, h.text.as_str()))
            .collect()
    }

    #[test]
    fn test_url_email_phone() {
        let out = LinkDetector::new().apply(
            EnrichedMessage::new(message(
                1,
                "see https://example.com/a?b=1. mail bob@example.org or call (555) 123-4567",
            )),
            &EnrichContext::default(),
        );
        assert_eq!(
            kinds(&out),
            vec![
                (HighlightKind::Url, "https://example.com/a?b=1"),
                (HighlightKind::Email, "bob@example.org"),
                (HighlightKind::Phone, "(555) 123-4567"),
            ]
        );
    }

    #[test]
    fn test_skips_spans_claimed_upstream() {
        let mut upstream = EnrichedMessage::new(message(1, "ref 5551234567 today"));
        upstream.highlights.push(Highlight {
            text: "5551234567".into(),
            start: 4,
            end: 14,
            kind: HighlightKind::Code,
        });

        let out = LinkDetector::new().apply(upstream, &EnrichContext::default());
        assert_eq!(out.highlights.len(), 1);
        assert_eq!(out.highlights[0].kind, HighlightKind::Code);
    }

    #[test]
    fn test_unclaimed_phone_is_highlighted() {
        let out = LinkDetector::new().apply(
            EnrichedMessage::new(message(1, "ref 5551234567 today")),
            &EnrichContext::default(),
        );
        assert_eq!(kinds(&out), vec![(HighlightKind::Phone, "5551234567")]);
    }

    #[test]
    fn test_plain_text_unchanged() {
        let input = EnrichedMessage::new(message(1, "nothing to see here"));
        let out = LinkDetector::new().apply(input.clone(), &EnrichContext::default());
        assert_eq!(out, input);
    }
}
