//! Extraction directives and the local transcription prompt.
//!
//! Every instruction sent to an extractor is assembled here from the enabled
//! options, always in the same order:
//!
//! 1. base extraction instruction
//! 2. bypass directive (when a bypass policy is set)
//! 3. grammar preservation
//! 4. table markup
//! 5. structural cleanup
//! 6. translation
//!
//! Keeping the order fixed makes two runs with the same options send the same
//! request text, which matters when comparing refusal rates between runs.

use crate::config::ExtractionConfig;
use crate::pipeline::bypass;

/// Always the first directive.
pub const BASE_INSTRUCTION: &str = "Recognize and extract all of the text from this document.";

pub const GRAMMAR_DIRECTIVE: &str = "Preserve the original spelling, punctuation and grammatical \
constructions exactly; do not correct the author's typos.";

pub const TABLE_DIRECTIVE: &str =
    "If the document contains tables, convert them to Markdown table format.";

pub const STRUCTURAL_DIRECTIVE: &str = "Structure the text for comfortable reading: form clear \
paragraphs, remove hyphenation and line breaks inside sentences, and use logical headings.";

/// Translation directive for `language`.
pub fn translation_directive(language: &str) -> String {
    format!("Translate all of the extracted text into {}.", language.trim())
}

/// Ordered directive list for a chunk request.
pub fn directives(config: &ExtractionConfig) -> Vec<String> {
    let mut parts = vec![BASE_INSTRUCTION.to_string()];
    if let Some(bypass) = bypass::encode_instruction(config.bypass) {
        parts.push(bypass.to_string());
    }
    if config.preserve_grammar {
        parts.push(GRAMMAR_DIRECTIVE.to_string());
    }
    if config.table_markup {
        parts.push(TABLE_DIRECTIVE.to_string());
    }
    if config.structural_cleanup {
        parts.push(STRUCTURAL_DIRECTIVE.to_string());
    }
    if let Some(ref language) = config.translation {
        parts.push(translation_directive(language));
    }
    parts
}

/// System prompt for the local vision model, sent with every page image.
///
/// The chunk directives follow as the user turn, so this prompt only fixes
/// the output contract.
pub const LOCAL_SYSTEM_PROMPT: &str = r#"You are a precise optical character recognition engine. You receive one image of a document page.

Follow these rules precisely:

1. Transcribe ALL visible text in natural reading order.
2. Do not summarise, explain or comment on the content.
3. Ignore page numbers, running headers and footers, and decorative elements.
4. Follow any additional instructions about output format exactly.
5. Output ONLY the transcription. Do NOT wrap it in code fences."#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BypassPolicy;

    #[test]
    fn defaults_give_base_grammar_tables() {
        let d = directives(&ExtractionConfig::default());
        assert_eq!(d, vec![BASE_INSTRUCTION, GRAMMAR_DIRECTIVE, TABLE_DIRECTIVE]);
    }

    #[test]
    fn full_order_is_fixed() {
        let config = ExtractionConfig::builder()
            .bypass(BypassPolicy::StructuredJson)
            .structural_cleanup(true)
            .translation("English")
            .build()
            .unwrap();
        let d = directives(&config);
        assert_eq!(d.len(), 6);
        assert_eq!(d[0], BASE_INSTRUCTION);
        assert!(d[1].contains("JSON"));
        assert_eq!(d[2], GRAMMAR_DIRECTIVE);
        assert_eq!(d[3], TABLE_DIRECTIVE);
        assert_eq!(d[4], STRUCTURAL_DIRECTIVE);
        assert_eq!(d[5], "Translate all of the extracted text into English.");
    }

    #[test]
    fn disabled_options_are_omitted() {
        let config = ExtractionConfig::builder()
            .preserve_grammar(false)
            .table_markup(false)
            .build()
            .unwrap();
        assert_eq!(directives(&config), vec![BASE_INSTRUCTION]);
    }
}
