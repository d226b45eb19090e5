//! Moderation-bypass codec.
//!
//! Some legitimate documents trip the remote service's content filter. Asking
//! the model to emit its transcription in a marked or structured shape makes
//! refusals less likely; this module produces the directive for each shape and
//! reverses it on the returned text before the text reaches the buffer.
//!
//! | Policy | Directive | Decode |
//! |--------|-----------|--------|
//! | `WordMarker` | `^` after every word | drop every `^` (lossy for a literal `^`) |
//! | `WrapperMarker` | `[[P]]…[[/P]]` around paragraphs | strip markers and an enclosing fence |
//! | `StructuredJson` | `{"1": "...", "2": "..."}` | join values by numeric key, raw text on parse failure or `{}` |
//!
//! Decoding text that carries no markers returns it unchanged for every policy.

use crate::config::BypassPolicy;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Marker inserted after each word by the word-marker policy.
pub const WORD_MARKER: char = '^';

/// Paragraph wrapper markers used by the wrapper policy.
pub const WRAP_OPEN: &str = "[[P]]";
pub const WRAP_CLOSE: &str = "[[/P]]";

const WORD_MARKER_DIRECTIVE: &str = "Insert the character ^ directly after every word of the extracted text, \
with no space before it. Do not add any other characters.";

const WRAPPER_DIRECTIVE: &str = "Wrap every paragraph of the extracted text in the markers [[P]] and [[/P]], \
for example [[P]]First paragraph.[[/P]], and separate paragraphs with one blank line.";

const STRUCTURED_DIRECTIVE: &str = "Return the extracted text strictly as a single JSON object whose keys are \
paragraph numbers written as strings in ascending order (\"1\", \"2\", \"3\", ...) and whose values are the \
paragraph texts. Output nothing except the JSON object.";

/// Directive asking the extractor to shape its output for `policy`.
pub fn encode_instruction(policy: BypassPolicy) -> Option<&'static str> {
    match policy {
        BypassPolicy::None => None,
        BypassPolicy::WordMarker => Some(WORD_MARKER_DIRECTIVE),
        BypassPolicy::WrapperMarker => Some(WRAPPER_DIRECTIVE),
        BypassPolicy::StructuredJson => Some(STRUCTURED_DIRECTIVE),
    }
}

/// Recover clean text from a response shaped by `policy`. Never fails.
pub fn decode(raw: &str, policy: BypassPolicy) -> String {
    match policy {
        BypassPolicy::None => raw.to_string(),
        BypassPolicy::WordMarker => raw.replace(WORD_MARKER, ""),
        BypassPolicy::WrapperMarker => decode_wrapped(raw),
        BypassPolicy::StructuredJson => decode_structured(raw).unwrap_or_else(|| {
            debug!("Structured bypass response did not parse; keeping raw text");
            raw.to_string()
        }),
    }
}

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\n(.*?)\n?```$").unwrap());

fn strip_outer_fence(input: &str) -> &str {
    let trimmed = input.trim();
    match RE_OUTER_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => trimmed,
    }
}

fn decode_wrapped(raw: &str) -> String {
    if !raw.contains(WRAP_OPEN) && !raw.contains(WRAP_CLOSE) {
        return raw.to_string();
    }
    strip_outer_fence(raw)
        .replace(WRAP_OPEN, "")
        .replace(WRAP_CLOSE, "")
        .trim()
        .to_string()
}

fn decode_structured(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(strip_outer_fence(raw)).ok()?;
    let object = value.as_object().filter(|object| !object.is_empty())?;

    let mut paragraphs = Vec::with_capacity(object.len());
    for (key, value) in object {
        let index: u64 = key.trim().parse().ok()?;
        paragraphs.push((index, value.as_str()?));
    }
    paragraphs.sort_by_key(|(index, _)| *index);

    Some(
        paragraphs
            .into_iter()
            .map(|(_, text)| text)
            .collect::<Vec<_>>()
            .join("\n\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [BypassPolicy; 4] = [
        BypassPolicy::None,
        BypassPolicy::WordMarker,
        BypassPolicy::WrapperMarker,
        BypassPolicy::StructuredJson,
    ];

    fn wrap_response(text: &str) -> String {
        text.split("\n\n")
            .map(|p| format!("{WRAP_OPEN}{p}{WRAP_CLOSE}"))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn structured_response(text: &str) -> String {
        let map: serde_json::Map<String, serde_json::Value> = text
            .split("\n\n")
            .enumerate()
            .map(|(i, p)| ((i + 1).to_string(), serde_json::Value::from(p)))
            .collect();
        serde_json::Value::Object(map).to_string()
    }

    #[test]
    fn word_marker_scenario() {
        assert_eq!(decode("Hello^ world^.", BypassPolicy::WordMarker), "Hello world.");
    }

    #[test]
    fn structured_scenario() {
        assert_eq!(
            decode(r#"{"1":"Hello.","2":"World."}"#, BypassPolicy::StructuredJson),
            "Hello.\n\nWorld."
        );
    }

    #[test]
    fn structured_orders_numerically() {
        let raw = r#"{"10":"ten","2":"two","1":"one"}"#;
        assert_eq!(decode(raw, BypassPolicy::StructuredJson), "one\n\ntwo\n\nten");
    }

    #[test]
    fn structured_accepts_fenced_json() {
        let raw = "```json\n{\"1\": \"Fenced.\", \"2\": \"Still fine.\"}\n```";
        assert_eq!(decode(raw, BypassPolicy::StructuredJson), "Fenced.\n\nStill fine.");
    }

    #[test]
    fn structured_falls_back_to_raw() {
        for raw in [
            "{\"1\": \"unterminated",
            r#"{"intro":"named keys"}"#,
            r#"{"1": 42}"#,
            r#"["1", "2"]"#,
            "{}",
            "```json\n{ }\n```",
        ] {
            assert_eq!(decode(raw, BypassPolicy::StructuredJson), raw);
        }
    }

    #[test]
    fn wrapper_strips_markers_and_fence() {
        let raw = "```\n[[P]]First.[[/P]]\n\n[[P]]Second.[[/P]]\n```";
        assert_eq!(decode(raw, BypassPolicy::WrapperMarker), "First.\n\nSecond.");
    }

    #[test]
    fn clean_text_is_unchanged_for_every_policy() {
        let samples = [
            "Plain paragraph.\n\nAnother one, with punctuation: yes.",
            "  leading and trailing space  ",
            "| a | b |\n|---|---|\n| 1 | 2 |",
            "```\nfenced but unmarked\n```",
            "",
        ];
        for policy in ALL {
            for text in samples {
                assert_eq!(decode(text, policy), text, "{policy:?} altered {text:?}");
            }
        }
    }

    #[test]
    fn wrapper_and_structured_round_trip() {
        let texts = [
            "Single paragraph.",
            "First paragraph.\n\nSecond paragraph has \"quotes\" and a ^ caret.",
            "Line one\nline two of the same paragraph.\n\nТекст на русском.",
        ];
        for text in texts {
            assert_eq!(decode(&wrap_response(text), BypassPolicy::WrapperMarker), text);
            assert_eq!(
                decode(&structured_response(text), BypassPolicy::StructuredJson),
                text
            );
        }
    }

    #[test]
    fn only_none_has_no_directive() {
        assert!(encode_instruction(BypassPolicy::None).is_none());
        assert!(encode_instruction(BypassPolicy::WordMarker)
            .is_some_and(|d| d.contains(WORD_MARKER)));
        assert!(encode_instruction(BypassPolicy::WrapperMarker)
            .is_some_and(|d| d.contains(WRAP_OPEN) && d.contains(WRAP_CLOSE)));
        assert!(encode_instruction(BypassPolicy::StructuredJson)
            .is_some_and(|d| d.contains("JSON")));
    }
}
