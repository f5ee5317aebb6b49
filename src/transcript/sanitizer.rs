//! Strips injected knowledge-base context from user messages.
//!
//! The platform prepends retrieval results to the user's text as
//!
//! ```text
//! [KNOWLEDGE BASE CONTEXT]
//! ```<fenced documents>```
//! <actual question>
//! ```
//!
//! Removal falls back through three strategies because the block is sometimes
//! double-encoded (escaped fences) or malformed.

use std::sync::LazyLock;

use regex::Regex;

/// Literal that opens an injected knowledge-base block.
pub const KNOWLEDGE_BASE_MARKER: &str = "[KNOWLEDGE BASE CONTEXT]";

/// Marker through the first well-formed fenced block.
static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\[KNOWLEDGE BASE CONTEXT\].*?```.*?```").expect("static regex")
});

/// Marker through a block whose fences were escaped by double encoding.
static ESCAPED_FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\[KNOWLEDGE BASE CONTEXT\].*?\\`\\`\\`.*?\\`\\`\\`").expect("static regex")
});

/// Recover the user's own text from a message.
///
/// Content without the marker is returned unchanged. Otherwise the result is
/// trimmed and may be empty when the message was nothing but injected context.
pub fn sanitize_user_message(content: &str) -> String {
    if !content.contains(KNOWLEDGE_BASE_MARKER) {
        return content.to_string();
    }

    let mut text = FENCED_BLOCK.replace(content, "").into_owned();
    if !text.contains(KNOWLEDGE_BASE_MARKER) {
        return text.trim().to_string();
    }

    text = ESCAPED_FENCED_BLOCK.replace(&text, "").into_owned();
    if !text.contains(KNOWLEDGE_BASE_MARKER) {
        return text.trim().to_string();
    }

    last_question_line(&text).unwrap_or_default()
}

/// Last-resort: the question is assumed to trail the injected block.
fn last_question_line(text: &str) -> Option<String> {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| {
            !line.is_empty()
                && !is_fence(line)
                && !is_separator(line)
                && !line.contains(KNOWLEDGE_BASE_MARKER)
        })
        .map(str::to_string)
}

fn is_fence(line: &str) -> bool {
    line.starts_with("```") || line.starts_with(r"\`\`\`")
}

fn is_separator(line: &str) -> bool {
    line.chars().all(|c| matches!(c, '-' | '=' | '*' | '_' | '#' | '~'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fenced_block_and_keeps_question() {
        let input = "[KNOWLEDGE BASE CONTEXT]\n```\nRefunds are issued within 30 days of purchase.\n```\nWhat is the refund policy?";
        assert_eq!(sanitize_user_message(input), "What is the refund policy?");
    }

    #[test]
    fn inline_fenced_block() {
        let input = "[KNOWLEDGE BASE CONTEXT] ```policy: 30 days``` What is the refund policy?";
        assert_eq!(sanitize_user_message(input), "What is the refund policy?");
    }

    #[test]
    fn passthrough_without_marker() {
        let input = "  plain question with ``` fences ```  ";
        assert_eq!(sanitize_user_message(input), input);
    }

    #[test]
    fn escaped_fences() {
        let input = r"[KNOWLEDGE BASE CONTEXT]\`\`\`doc text\`\`\` Where is my order?";
        assert_eq!(sanitize_user_message(input), "Where is my order?");
    }

    #[test]
    fn falls_back_to_last_meaningful_line() {
        let input = "[KNOWLEDGE BASE CONTEXT]\nShipping takes 3 days.\n----\nHow long is shipping?\n\n";
        assert_eq!(sanitize_user_message(input), "How long is shipping?");
    }

    #[test]
    fn fallback_skips_trailing_fence_lines() {
        let input = "[KNOWLEDGE BASE CONTEXT]\n```\nunclosed docs\nCan I upgrade?\n\\`\\`\\`";
        // One plain and one escaped fence, so neither block pattern matches.
        assert_eq!(sanitize_user_message(input), "Can I upgrade?");
    }

    #[test]
    fn pure_context_becomes_empty() {
        let input = "[KNOWLEDGE BASE CONTEXT]\n```\nall docs, no question\n```\n";
        assert_eq!(sanitize_user_message(input), "");
    }

    #[test]
    fn marker_only_line_yields_empty() {
        assert_eq!(sanitize_user_message("[KNOWLEDGE BASE CONTEXT]"), "");
    }
}
