//! Post-processing: deterministic cleanup of extracted chunk text.
//!
//! Even well-instructed models add artefacts that are harmless to a reader
//! but noisy in an exported document: an outer ```` ```markdown ```` fence,
//! Windows line endings, trailing spaces, runs of blank lines, zero-width
//! characters. These rules fix them without touching the words.
//!
//! ## Rule Order
//!
//! Fences are stripped before line endings are normalised so the fence regex
//! sees the raw shape; blank-line collapsing runs after trailing whitespace is
//! gone so lines holding only spaces count as blank.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule to one chunk's text.
///
/// 1. Strip an outer markdown fence
/// 2. Normalise line endings (CRLF → LF)
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ consecutive blank lines down to 1
/// 5. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 6. Trim the whole text
pub fn clean_text(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md|text)?\r?\n(.*)\r?\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 5: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_fence() {
        assert_eq!(clean_text("```markdown\n# Title\nBody\n```"), "# Title\nBody");
    }

    #[test]
    fn keeps_inner_code_blocks() {
        let input = "Intro\n\n```rust\nfn main() {}\n```\n\nOutro";
        assert_eq!(clean_text(input), input);
    }

    #[test]
    fn normalises_whitespace() {
        assert_eq!(
            clean_text("line one   \r\nline two\r\n\r\n\r\n\r\nnext"),
            "line one\nline two\n\nnext"
        );
    }

    #[test]
    fn removes_invisible_characters() {
        assert_eq!(clean_text("\u{FEFF}soft\u{00AD}ware\u{200B}"), "software");
    }

    #[test]
    fn already_clean_text_is_stable() {
        let input = "Paragraph one.\n\nParagraph two.";
        assert_eq!(clean_text(input), input);
        assert_eq!(clean_text(&clean_text(input)), input);
    }
}
