//! Deterministic Markdown-to-plain-text summary generation (C12).
//!
//! Three-tier fallback: prefer an explicit summary field, else derive
//! one from the first meaningful paragraph of the body, else fall back
//! to a flattened, truncated version of the whole body. No LLM calls -
//! this must be cheap and reproducible.

const SUMMARY_CHAR_LIMIT: usize = 150;

/// Strip common Markdown markup to plain text: headings, emphasis,
/// links (keeping the link text), inline code, and blockquote markers.
/// Not a full CommonMark parser - good enough for summary purposes.
pub fn markdown_to_plain_text(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    for line in markdown.lines() {
        let mut line = line.trim();
        line = line.trim_start_matches(|c| c == '#' || c == ' ');
        line = line.trim_start_matches(['>', '-', '*', ' ']);
        if line.is_empty() {
            out.push('\n');
            continue;
        }
        out.push_str(&strip_inline_markup(line));
        out.push('\n');
    }
    out.trim().to_string()
}

fn strip_inline_markup(line: &str) -> String {
    let mut result = String::with_capacity(line.len());
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' | '_' | '`' => {
                i += 1;
            }
            '[' => {
                // Render [text](url) as just "text".
                if let Some(close) = chars[i..].iter().position(|c| *c == ']') {
                    let text_end = i + close;
                    let text: String = chars[i + 1..text_end].iter().collect();
                    result.push_str(&text);
                    if chars.get(text_end + 1) == Some(&'(') {
                        if let Some(paren_close) = chars[text_end..].iter().position(|c| *c == ')') {
                            i = text_end + paren_close + 1;
                            continue;
                        }
                    }
                    i = text_end + 1;
                } else {
                    result.push(chars[i]);
                    i += 1;
                }
            }
            other => {
                result.push(other);
                i += 1;
            }
        }
    }
    result
}

/// Truncate `text` to at most `SUMMARY_CHAR_LIMIT` characters, cutting at
/// the last word boundary before the limit rather than mid-word, and
/// appending an ellipsis when truncated.
pub fn truncate_at_word_boundary(text: &str) -> String {
    let char_count = text.chars().count();
    if char_count <= SUMMARY_CHAR_LIMIT {
        return text.to_string();
    }

    let truncated: String = text.chars().take(SUMMARY_CHAR_LIMIT).collect();
    let cut = truncated.rfind(' ').unwrap_or(truncated.len());
    format!("{}...", &truncated[..cut])
}

/// First non-empty paragraph of plain text, where a paragraph is a
/// maximal run of non-blank lines.
fn first_paragraph(plain_text: &str) -> Option<&str> {
    plain_text
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty())
}

/// Generate a summary for a memory body using the three-tier fallback:
/// 1. `explicit_summary`, if present and non-empty.
/// 2. The first paragraph of the Markdown body, flattened to plain text.
/// 3. A truncated flattening of the entire body.
///
/// Every tier is passed through word-boundary truncation.
pub fn generate_summary(explicit_summary: Option<&str>, markdown_body: &str) -> String {
    if let Some(s) = explicit_summary {
        if !s.trim().is_empty() {
            return truncate_at_word_boundary(s.trim());
        }
    }

    let plain = markdown_to_plain_text(markdown_body);
    if let Some(paragraph) = first_paragraph(&plain) {
        if !paragraph.is_empty() {
            return truncate_at_word_boundary(paragraph);
        }
    }

    truncate_at_word_boundary(&plain)
}

/// Parse `trigger_phrases` from a value that may be a JSON array of
/// strings or a single JSON string containing one phrase - some legacy
/// callers send a bare string instead of wrapping it in an array.
pub fn parse_trigger_phrases(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .filter(|s| !s.trim().is_empty())
            .collect(),
        serde_json::Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_summary_wins_over_body() {
        let s = generate_summary(Some("the real summary"), "# Title\n\nBody text here.");
        assert_eq!(s, "the real summary");
    }

    #[test]
    fn empty_explicit_summary_falls_through_to_body() {
        let s = generate_summary(Some("   "), "First paragraph text.\n\nSecond paragraph.");
        assert_eq!(s, "First paragraph text.");
    }

    #[test]
    fn no_summary_uses_first_paragraph() {
        let s = generate_summary(None, "# Heading\n\nThis is the lead paragraph.\n\nMore detail follows.");
        assert_eq!(s, "This is the lead paragraph.");
    }

    #[test]
    fn strips_markdown_emphasis_and_links() {
        let plain = markdown_to_plain_text("This is **bold** and a [link](https://example.com).");
        assert_eq!(plain, "This is bold and a link.");
    }

    #[test]
    fn truncates_at_word_boundary_with_ellipsis() {
        let long = "word ".repeat(60);
        let truncated = truncate_at_word_boundary(&long);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= SUMMARY_CHAR_LIMIT + 4);
        assert!(!truncated.trim_end_matches("...").ends_with(' '));
    }

    #[test]
    fn short_text_is_unchanged() {
        assert_eq!(truncate_at_word_boundary("short"), "short");
    }

    #[test]
    fn trigger_phrases_accepts_array() {
        let parsed = parse_trigger_phrases(&json!(["a", "b", ""]));
        assert_eq!(parsed, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn trigger_phrases_accepts_bare_string() {
        let parsed = parse_trigger_phrases(&json!("single phrase"));
        assert_eq!(parsed, vec!["single phrase".to_string()]);
    }

    #[test]
    fn trigger_phrases_rejects_other_types() {
        assert!(parse_trigger_phrases(&json!(42)).is_empty());
        assert!(parse_trigger_phrases(&json!(null)).is_empty());
    }
}
