//! Text surgery used by the recovery strategies.

use std::sync::OnceLock;

use regex::Regex;

static LEADING_FENCE: OnceLock<Regex> = OnceLock::new();
static TRAILING_FENCE: OnceLock<Regex> = OnceLock::new();
static FENCE_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn leading_fence() -> &'static Regex {
    LEADING_FENCE.get_or_init(|| Regex::new(r"^```[A-Za-z]*[ \t]*\r?\n?").expect("valid regex"))
}

fn trailing_fence() -> &'static Regex {
    TRAILING_FENCE.get_or_init(|| Regex::new(r"\r?\n?[ \t]*```\s*$").expect("valid regex"))
}

fn fence_patterns() -> &'static [Regex] {
    FENCE_PATTERNS.get_or_init(|| {
        [
            r"(?s)```json\s*\n(.*?)\n```",
            r"(?s)```\s*\n(.*?)\n```",
            r"(?s)```json(.*?)```",
            r"(?s)```(.*?)```",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
    })
}

/// Trim whitespace and a surrounding markdown fence.
pub(crate) fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();
    let without_lead = leading_fence().replace(trimmed, "");
    trailing_fence().replace(&without_lead, "").trim().to_string()
}

/// Contents of the first fenced code block, trying `json`-tagged fences first.
pub(crate) fn fenced_block(text: &str) -> Option<String> {
    fence_patterns().iter().find_map(|re| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    })
}

/// Full strategy-2 cleanup: fences, then [`repair_json`].
pub(crate) fn clean(text: &str) -> String {
    repair_json(&strip_fences(text))
}

/// Single string-aware pass that fixes the defects models commonly produce:
///
/// - missing comma between two values (`1 "b"`, `} {`, `"x"\n"y"`)
/// - trailing comma before `}` / `]` / end of input
/// - raw newlines, carriage returns and tabs inside string literals
/// - single-quoted keys and values
/// - Python literals `True` / `False` / `None`
///
/// Valid JSON passes through unchanged.
pub(crate) fn repair_json(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    let mut last_sig: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                if ends_value(last_sig) {
                    out.push(',');
                }
                i = copy_string(&chars, i, &mut out);
                last_sig = Some('"');
                continue;
            }
            '{' | '[' => {
                if ends_value(last_sig) {
                    out.push(',');
                }
                out.push(c);
                last_sig = Some(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, None | Some('}') | Some(']')) {
                    out.push(',');
                    last_sig = Some(',');
                }
            }
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let word = match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                };
                let literal = matches!(word, "true" | "false" | "null");
                if literal && ends_value(last_sig) {
                    out.push(',');
                }
                out.push_str(word);
                last_sig = if literal { word.chars().last() } else { Some('a') };
                continue;
            }
            c if c.is_ascii_digit() || c == '-' => {
                if ends_value(last_sig) {
                    out.push(',');
                }
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || matches!(chars[i], '-' | '+' | '.' | 'e' | 'E'))
                {
                    out.push(chars[i]);
                    i += 1;
                }
                last_sig = Some('0');
                continue;
            }
            c if c.is_whitespace() => out.push(c),
            _ => {
                out.push(c);
                last_sig = Some(c);
            }
        }
        i += 1;
    }
    out
}

fn ends_value(last: Option<char>) -> bool {
    matches!(last, Some('"' | '}' | ']' | '0' | 'e' | 'l'))
}

// Copies one string literal starting at `start` (the opening quote) as a
// double-quoted JSON string. Returns the index just past the closing quote.
fn copy_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                match chars.get(i + 1) {
                    Some('\'') if quote == '\'' => out.push('\''),
                    Some(next) => {
                        out.push('\\');
                        out.push(*next);
                    }
                    None => out.push_str("\\\\"),
                }
                i += 2;
                continue;
            }
            c if c == quote => {
                out.push('"');
                return i + 1;
            }
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
        i += 1;
    }
    i
}

/// Every balanced `{...}` substring, longest first. Braces inside double-quoted
/// strings are ignored.
pub(crate) fn balanced_objects(text: &str) -> Vec<&str> {
    let mut stack: Vec<usize> = Vec::new();
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (idx, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push(idx),
            '}' => {
                if let Some(open) = stack.pop() {
                    spans.push((open, idx + 1));
                }
            }
            _ => {}
        }
    }

    spans.sort_by(|a, b| (b.1 - b.0).cmp(&(a.1 - a.0)).then(a.0.cmp(&b.0)));
    spans.into_iter().map(|(s, e)| &text[s..e]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).expect("valid json")
    }

    #[test]
    fn test_valid_json_unchanged() {
        let text = r#"{"a": [1, 2.5e-3, -4], "b": {"c": "x, y"}, "d": true, "e": null}"#;
        assert_eq!(repair_json(text), text);
    }

    #[test]
    fn test_missing_and_trailing_comma() {
        assert_eq!(parse(&repair_json(r#"{"a": 1 "b": 2,}"#)), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_newline_separated_pairs() {
        let text = "{\n  \"a\": \"x\"\n  \"b\": [1, 2,]\n}";
        assert_eq!(parse(&repair_json(text)), json!({"a": "x", "b": [1, 2]}));
    }

    #[test]
    fn test_raw_newline_in_string() {
        let text = "{\"explanation\": \"line one\nline two\"}";
        assert_eq!(
            parse(&repair_json(text)),
            json!({"explanation": "line one\nline two"})
        );
    }

    #[test]
    fn test_single_quotes() {
        let text = r#"{'a': 'it\'s "fine"', 'b': True, 'c': None}"#;
        assert_eq!(
            parse(&repair_json(text)),
            json!({"a": "it's \"fine\"", "b": true, "c": null})
        );
    }

    #[test]
    fn test_strip_fences() {
        let text = "  ```json\n{\"a\": 1}\n```  ";
        assert_eq!(strip_fences(text), "{\"a\": 1}");
        assert_eq!(strip_fences("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn test_fenced_block_in_prose() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nThanks.";
        assert_eq!(fenced_block(text).as_deref(), Some("{\"a\": 1}"));
        assert_eq!(fenced_block("no fences"), None);
    }

    #[test]
    fn test_balanced_objects_longest_first() {
        let text = r#"prose {"outer": {"inner": 1}, "s": "}"} tail {"x": 2}"#;
        let found = balanced_objects(text);
        assert_eq!(found[0], r#"{"outer": {"inner": 1}, "s": "}"}"#);
        assert!(found.contains(&r#"{"inner": 1}"#));
        assert!(found.contains(&r#"{"x": 2}"#));
    }
}
