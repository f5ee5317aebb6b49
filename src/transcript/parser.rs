//! Log fragment parser: recovers role/content messages from a snapshot line.
//!
//! Snapshot lines end with a bracketed array that looks like a scripting-language
//! dictionary dump, e.g.
//!
//! ```text
//! ... Universal context [{'role': 'user', 'content': "What's new?"}, {'role': 'assistant', 'content': 'Nothing.'}]
//! ```
//!
//! This is not JSON: keys and values use either quote style, apostrophes appear
//! unescaped inside values, and escapes are inconsistent. The scanner is a
//! heuristic. A quote only closes a value when it is followed by a terminator
//! (`}`, `, `, `,}`) or the end of the array, so values that themselves contain
//! a terminator right after a quote are cut short.

use tracing::debug;

use super::{Message, Role};

/// Phrase that introduces the snapshot array.
const CONTEXT_MARKER: &str = "context [";

const ROLE_MARKERS: &[(&str, Role)] = &[
    ("'role': 'user'", Role::User),
    ("\"role\": \"user\"", Role::User),
    ("'role': 'assistant'", Role::Assistant),
    ("\"role\": \"assistant\"", Role::Assistant),
    ("'role': 'system'", Role::System),
    ("\"role\": \"system\"", Role::System),
];

const CONTENT_KEYS: &[&str] = &["'content': ", "\"content\": "];

/// Byte sequences that may follow a closing quote.
const TERMINATORS: &[&[u8]] = &[b"}", b", ", b",}"];

/// Position of a role marker inside the snapshot region.
#[derive(Debug, Clone, Copy)]
struct RoleMatch {
    start: usize,
    end: usize,
    role: Role,
}

/// Extract ordered messages from one raw log line.
///
/// Returns an empty list when the line carries no trailing array; most log
/// lines are unrelated to snapshots, so that is not an error. `system`
/// messages are recognised and dropped.
pub fn parse_messages(log: &str) -> Vec<Message> {
    let Some(region) = snapshot_region(log) else {
        return Vec::new();
    };

    let mut messages = Vec::new();
    let mut cursor = 0;

    while let Some(found) = find_role(region, cursor) {
        let next_role = find_role(region, found.end)
            .map(|r| r.start)
            .unwrap_or(region.len());

        let Some((value_start, quote)) = find_content(region, found.end, next_role) else {
            cursor = found.end;
            continue;
        };

        let Some(close) = scan_content(region.as_bytes(), value_start, quote) else {
            debug!(
                role = %found.role,
                offset = value_start,
                "Unterminated content in snapshot, keeping earlier messages"
            );
            break;
        };

        if found.role != Role::System {
            messages.push(Message {
                role: found.role,
                content: unescape(&region[value_start..close]),
            });
        }
        cursor = close + 1;
    }

    messages
}

/// The text between the array's opening `[` and its closing `]`.
///
/// The array must close the line (trailing whitespace aside). It opens at the
/// `[` following the context marker, or at the first `[` when no marker exists.
fn snapshot_region(log: &str) -> Option<&str> {
    let trimmed = log.trim_end();
    if !trimmed.ends_with(']') {
        return None;
    }
    let close = trimmed.len() - 1;

    // ASCII lowercasing keeps byte offsets aligned with `trimmed`.
    let lowered = trimmed.to_ascii_lowercase();
    let open = match lowered.find(CONTEXT_MARKER) {
        Some(pos) => pos + CONTEXT_MARKER.len() - 1,
        None => trimmed.find('[')?,
    };

    if open >= close {
        return None;
    }
    Some(&trimmed[open + 1..close])
}

/// Nearest role marker at or after `from`.
fn find_role(region: &str, from: usize) -> Option<RoleMatch> {
    let haystack = region.get(from..)?;
    ROLE_MARKERS
        .iter()
        .filter_map(|(marker, role)| {
            haystack.find(marker).map(|pos| RoleMatch {
                start: from + pos,
                end: from + pos + marker.len(),
                role: *role,
            })
        })
        .min_by_key(|m| m.start)
}

/// Locate the content value opened between `from` and `limit`.
///
/// Returns the byte offset of the first value character and the active quote.
fn find_content(region: &str, from: usize, limit: usize) -> Option<(usize, u8)> {
    let haystack = region.get(from..limit)?;
    let (pos, key) = CONTENT_KEYS
        .iter()
        .filter_map(|key| haystack.find(key).map(|pos| (pos, *key)))
        .min_by_key(|(pos, _)| *pos)?;

    let quote_at = from + pos + key.len();
    match region.as_bytes().get(quote_at) {
        Some(&q @ (b'\'' | b'"')) => Some((quote_at + 1, q)),
        _ => None,
    }
}

/// Walk a quoted value and return the offset of its closing quote.
///
/// Byte-level scanning is safe for UTF-8 here: every byte we compare against is
/// ASCII and never occurs inside a multi-byte sequence.
fn scan_content(bytes: &[u8], start: usize, quote: u8) -> Option<usize> {
    let mut escaped = false;
    for i in start..bytes.len() {
        let b = bytes[i];
        if escaped {
            escaped = false;
        } else if b == b'\\' {
            escaped = true;
        } else if b == quote && closes_value(&bytes[i + 1..]) {
            return Some(i);
        }
    }
    None
}

fn closes_value(rest: &[u8]) -> bool {
    rest.is_empty() || TERMINATORS.iter().any(|t| rest.starts_with(t))
}

/// Collapse the escape sequences the platform emits. Unknown escapes are kept.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apostrophe_and_escaped_quote_round_trip() {
        let line = r#"2024-05-01 INFO Universal context [{'role': 'user', 'content': 'It's broken again'}, {'role': 'user', 'content': 'She said \'reboot\' twice'}]"#;
        let messages = parse_messages(line);
        assert_eq!(
            messages,
            vec![
                Message::user("It's broken again"),
                Message::user("She said 'reboot' twice"),
            ]
        );
    }

    #[test]
    fn two_turns_with_mixed_quotes() {
        let line = r#"Universal context [{'role': 'system', 'content': 'Be brief.'}, {'role': 'user', 'content': "What's the refund window?"}, {'role': 'assistant', 'content': 'Thirty days.'}, {'role': 'user', 'content': 'And \"store credit\"?'}, {'role': 'assistant', 'content': "Sure, that's fine."}]"#;
        let messages = parse_messages(line);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], Message::user("What's the refund window?"));
        assert_eq!(messages[1], Message::assistant("Thirty days."));
        assert_eq!(messages[2], Message::user("And \"store credit\"?"));
        assert_eq!(messages[3], Message::assistant("Sure, that's fine."));
    }

    #[test]
    fn system_messages_are_dropped() {
        let line = "context [{'role': 'system', 'content': 'prompt'}]";
        assert!(parse_messages(line).is_empty());
    }

    #[test]
    fn unrelated_line_yields_nothing() {
        assert!(parse_messages("GET /health 200 3ms").is_empty());
        assert!(parse_messages("context [unterminated").is_empty());
        assert!(parse_messages("").is_empty());
    }

    #[test]
    fn double_quoted_role_markers() {
        let line = r#"Model specific context [{"role": "user", "content": "hi"}, {"role": "assistant", "content": "hello"}]"#;
        assert_eq!(
            parse_messages(line),
            vec![Message::user("hi"), Message::assistant("hello")]
        );
    }

    #[test]
    fn newline_escape_is_collapsed() {
        let line = r"context [{'role': 'user', 'content': 'line one\nline two'}]";
        assert_eq!(parse_messages(line)[0].content, "line one\nline two");
    }

    #[test]
    fn brace_newline_terminator() {
        let line = "context [{'role': 'user', 'content': 'first'}\n, {'role': 'assistant', 'content': 'second'}]";
        assert_eq!(
            parse_messages(line),
            vec![Message::user("first"), Message::assistant("second")]
        );
    }

    #[test]
    fn content_before_other_keys() {
        let line = "context [{'role': 'user', 'content': 'ping', 'name': 'x'}]";
        assert_eq!(parse_messages(line), vec![Message::user("ping")]);
    }

    #[test]
    fn unterminated_value_keeps_earlier_messages() {
        let line = "context [{'role': 'user', 'content': 'ok'}, {'role': 'assistant', 'content': 'never closed]";
        assert_eq!(parse_messages(line), vec![Message::user("ok")]);
    }

    #[test]
    fn role_without_content_is_skipped() {
        let line = "context [{'role': 'assistant', 'tool_calls': []}, {'role': 'user', 'content': 'next'}]";
        assert_eq!(parse_messages(line), vec![Message::user("next")]);
    }

    #[test]
    fn embedded_terminator_truncates_value() {
        // Known boundary: a quote followed by `}, ` inside the text reads as the end.
        let line = "context [{'role': 'user', 'content': 'The payload ended with '}, ' and broke'}]";
        let messages = parse_messages(line);
        assert_eq!(messages, vec![Message::user("The payload ended with ")]);
    }

    #[test]
    fn non_ascii_content_survives() {
        let line = "context [{'role': 'user', 'content': 'café ☕ ok'}]";
        assert_eq!(parse_messages(line)[0].content, "café ☕ ok");
    }

    #[test]
    fn unescape_keeps_unknown_sequences() {
        assert_eq!(unescape(r"a\qb"), r"a\qb");
        assert_eq!(unescape(r"tail\"), r"tail\");
        assert_eq!(unescape(r"back\\slash"), r"back\slash");
    }
}
