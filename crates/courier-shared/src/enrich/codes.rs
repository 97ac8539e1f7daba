//! One-time code detection.

use std::sync::LazyLock;

use regex::Regex;

use super::{char_span, EnrichContext, Processor};
use crate::types::{Confidence, DetectedCode, EnrichedMessage, Highlight, HighlightKind};

static SPLIT_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{3})[- ](\d{3})\b").expect("valid split code pattern"));

static PLAIN_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4,8}\b").expect("valid code pattern"));

static KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(code|codes|verification|verify|otp|passcode|pin|2fa|login|log-in|sign-in|security|one[- ]time)\b",
    )
    .expect("valid keyword pattern")
});

/// Separators that glue digit groups into one larger number.
const JOINERS: &[char] = &['-', '.', ',', '/', ':', ' '];

#[derive(Debug, Default)]
pub struct CodeDetector;

impl CodeDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Processor for CodeDetector {
    fn apply(&self, mut message: EnrichedMessage, _ctx: &EnrichContext) -> EnrichedMessage {
        let text = message.text().to_string();
        if text.is_empty() {
            return message;
        }
        let has_keyword = KEYWORD.is_match(&text);

        let mut found: Vec<(usize, usize, String)> = Vec::new();

        for caps in SPLIT_CODE.captures_iter(&text) {
            let Some(m) = caps.get(0) else { continue };
            if embedded_in_number(&text, m.start(), m.end()) {
                continue;
            }
            found.push((m.start(), m.end(), format!("{}{}", &caps[1], &caps[2])));
        }

        for m in PLAIN_CODE.find_iter(&text) {
            if embedded_in_number(&text, m.start(), m.end()) {
                continue;
            }
            if found.iter().any(|(s, e, _)| *s < m.end() && m.start() < *e) {
                continue;
            }
            found.push((m.start(), m.end(), m.as_str().to_string()));
        }

        found.sort_by_key(|(start, _, _)| *start);

        for (start, end, value) in found {
            let Some(confidence) = confidence_for(&value, has_keyword) else {
                continue;
            };
            let (cs, ce) = char_span(&text, start, end);
            if message.is_unclaimed(cs, ce) {
                message.highlights.push(Highlight {
                    text: text[start..end].to_string(),
                    start: cs,
                    end: ce,
                    kind: HighlightKind::Code,
                });
            }
            if !message.codes.iter().any(|c| c.value == value) {
                message.codes.push(DetectedCode { value, confidence });
            }
        }

        message
    }
}

fn confidence_for(value: &str, has_keyword: bool) -> Option<Confidence> {
    let year_like = value.len() == 4
        && value
            .parse::<u32>()
            .is_ok_and(|n| (1900..=2099).contains(&n));

    match (has_keyword, year_like, value.len()) {
        (true, true, _) => Some(Confidence::Low),
        (false, true, _) => None,
        (true, false, _) => Some(Confidence::High),
        (false, false, 6) => Some(Confidence::Medium),
        (false, false, _) => Some(Confidence::Low),
    }
}

/// True when `[start, end)` is one group of a larger number such as a phone
/// number, a price or a date (`555-123-4567`, `1,250.00`, `12/2024`).
fn embedded_in_number(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().rev().take(2).collect::<Vec<_>>();
    let after = text[end..].chars().take(2).collect::<Vec<_>>();

    let glued = |pair: &[char]| match pair {
        [sep, digit, ..] => JOINERS.contains(sep) && digit.is_ascii_digit(),
        _ => false,
    };

    let currency = matches!(before.first(), Some('$' | '€' | '£' | '+' | '#'));
    currency || glued(&before) || glued(&after)
}
