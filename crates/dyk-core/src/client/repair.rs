//! Pre-parse repair of model responses.
//!
//! Generative services return JSON wrapped in markdown, decorated with
//! comments, or cut off mid-document. Each step below is a pure text
//! transform; [`REPAIR_STEPS`] applies them in order before the final
//! `serde_json` parse.

use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::ParseError;

/// A named text transform.
pub type RepairStep = (&'static str, fn(&str) -> String);

/// Repair steps in application order.
pub const REPAIR_STEPS: &[RepairStep] = &[
    ("strip_code_fences", strip_code_fences),
    ("extract_json_span", extract_json_span),
    ("strip_comments", strip_comments),
    ("insert_missing_commas", insert_missing_commas),
    ("remove_trailing_commas", remove_trailing_commas),
    ("close_truncated", close_truncated),
];

/// Openers tried as document starts before giving up.
const MAX_CANDIDATES: usize = 4;

/// Parse `text` as `T`, repairing it first if the raw text does not parse.
///
/// Prose before the document may itself contain brackets, so each
/// top-level bracketed region is tried as the start in turn and the first
/// one that parses wins. The error reported is the first candidate's.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ParseError::no_content("empty response"));
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let unfenced = strip_code_fences(trimmed);
    let mut first_error = None;
    for start in candidate_starts(&unfenced) {
        let repaired = repair(&unfenced[start..]);
        match serde_json::from_str(&repaired) {
            Ok(value) => return Ok(value),
            Err(e) => {
                first_error.get_or_insert_with(|| ParseError::partial(e.to_string(), repaired.len()));
            }
        }
    }
    Err(first_error.unwrap_or_else(|| ParseError::no_content("no JSON object or array in response")))
}

/// Byte offsets of top-level openers: each one after the previous
/// candidate's balanced region closes.
fn candidate_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut from = 0;
    while starts.len() < MAX_CANDIDATES {
        let Some(offset) = text[from..].find(['{', '[']) else {
            break;
        };
        let start = from + offset;
        starts.push(start);
        match balanced_len(&text[start..]) {
            Some(len) => from = start + len,
            None => break,
        }
    }
    starts
}

/// Length in bytes of the bracketed region `text` starts with, or `None`
/// when it never closes.
fn balanced_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Run every step of [`REPAIR_STEPS`] over `text`.
pub fn repair(text: &str) -> String {
    REPAIR_STEPS.iter().fold(text.to_string(), |acc, (name, step)| {
        let next = step(&acc);
        if next != acc {
            trace!(step = name, "applied repair step");
        }
        next
    })
}

/// Keep only the body of the first markdown code fence, if any.
/// An unterminated fence keeps everything after the opening line.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed.to_string();
    };
    let after = &trimmed[start + 3..];
    let tag_len = after
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric())
        .count();
    let body = &after[tag_len..];
    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim().to_string()
}

/// Drop prose around the document: from the first `{`/`[` to the last
/// `}`/`]`, or to the end when no closer exists. Empty when there is no
/// opener at all.
pub fn extract_json_span(text: &str) -> String {
    let Some(start) = text.find(['{', '[']) else {
        return String::new();
    };
    let body = &text[start..];
    let end = body.rfind(['}', ']']).map(|i| i + 1).unwrap_or(body.len());
    body[..end].to_string()
}

/// Remove `//` line comments and `/* */` block comments outside strings.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Insert the `,` a model dropped between a finished value (`}`, `]` or a
/// closing quote) and the next value or key, across whitespace.
pub fn insert_missing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        out.push(c);
        let closes_value = if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            !in_string
        } else if c == '"' {
            in_string = true;
            false
        } else {
            matches!(c, '}' | ']')
        };

        if closes_value {
            let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, Some('{') | Some('[') | Some('"')) {
                out.push(',');
            }
        }
    }
    out
}

/// Remove commas directly followed (modulo whitespace) by `}` or `]`.
pub fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Close a document that was cut off: terminate an open string, drop a
/// dangling key or separator, then close open brackets innermost first.
pub fn close_truncated(text: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    if !in_string && stack.is_empty() {
        return text.to_string();
    }

    let mut out = text.to_string();
    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    loop {
        let len = out.trim_end().len();
        out.truncate(len);

        if out.ends_with(',') {
            out.pop();
            continue;
        }
        if out.ends_with(':') {
            out.pop();
            let len = out.trim_end().len();
            out.truncate(len);
            if let Some(start) = trailing_string_start(&out) {
                out.truncate(start);
            }
            continue;
        }
        if stack.last() == Some(&'}') && ends_with_dangling_key(&out) {
            if let Some(start) = trailing_string_start(&out) {
                out.truncate(start);
                continue;
            }
        }
        // An opener with nothing inside it, below the document root
        if stack.len() > 1
            && ((out.ends_with('{') && stack.last() == Some(&'}'))
                || (out.ends_with('[') && stack.last() == Some(&']')))
        {
            out.pop();
            stack.pop();
            continue;
        }
        break;
    }

    out.extend(stack.iter().rev());
    out
}

/// Byte offset of the opening quote of the string literal `s` ends with.
fn trailing_string_start(s: &str) -> Option<usize> {
    if !s.ends_with('"') {
        return None;
    }
    let bytes = s.as_bytes();
    let mut i = bytes.len() - 1;
    while i > 0 {
        i -= 1;
        if bytes[i] == b'"' {
            let backslashes = bytes[..i].iter().rev().take_while(|&&b| b == b'\\').count();
            if backslashes % 2 == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Whether `s` ends with a string that sits in key position of an object.
fn ends_with_dangling_key(s: &str) -> bool {
    let Some(start) = trailing_string_start(s) else {
        return false;
    };
    matches!(s[..start].trim_end().chars().last(), Some('{') | Some(','))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pair {
        a: i64,
        #[serde(default)]
        b: Vec<i64>,
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("Here you go:\n```\n[1]\n```\nEnjoy"), "[1]");
        assert_eq!(strip_code_fences("```json\n{\"a\": 1"), "{\"a\": 1");
        assert_eq!(strip_code_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_span() {
        assert_eq!(extract_json_span("Sure! {\"a\": 1} Hope this helps."), "{\"a\": 1}");
        assert_eq!(extract_json_span("prefix [1, 2"), "[1, 2");
        assert_eq!(extract_json_span("no document here"), "");
    }

    #[test]
    fn test_strip_comments() {
        let text = "{\n  \"a\": 1, // count\n  /* block */ \"b\": []\n}";
        assert_eq!(strip_comments(text), "{\n  \"a\": 1, \n   \"b\": []\n}");
    }

    #[test]
    fn test_strip_comments_preserves_urls_in_strings() {
        let text = r#"{"url": "https://cdc.gov/x", "q": "a \" // b"}"#;
        assert_eq!(strip_comments(text), text);
    }

    #[test]
    fn test_insert_missing_commas_between_objects() {
        assert_eq!(
            insert_missing_commas("[{\"hook\": \"a\"}\n{\"hook\": \"b\"}]"),
            "[{\"hook\": \"a\"},\n{\"hook\": \"b\"}]"
        );
        assert_eq!(insert_missing_commas("[[1] [2]]"), "[[1], [2]]");
    }

    #[test]
    fn test_insert_missing_commas_between_members() {
        assert_eq!(
            insert_missing_commas(r#"{"a": {"x": 1} "b": "y" "c": [2]}"#),
            r#"{"a": {"x": 1}, "b": "y", "c": [2]}"#
        );
    }

    #[test]
    fn test_insert_missing_commas_leaves_valid_json() {
        let text = r#"{"a": "} {", "b": ["x", "y"], "c": {"d": "\" ["}}"#;
        assert_eq!(insert_missing_commas(text), text);
        assert_eq!(insert_missing_commas("{\"k\": \"v\"}"), "{\"k\": \"v\"}");
    }

    #[test]
    fn test_remove_trailing_commas() {
        assert_eq!(remove_trailing_commas("{\"a\": 1,}"), "{\"a\": 1}");
        assert_eq!(remove_trailing_commas("[1, 2,\n ]"), "[1, 2\n ]");
        assert_eq!(remove_trailing_commas(r#"{"s": ",}"}"#), r#"{"s": ",}"}"#);
    }

    #[test]
    fn test_close_truncated_open_string() {
        assert_eq!(close_truncated(r#"{"hook": "Did you"#), r#"{"hook": "Did you"}"#);
    }

    #[test]
    fn test_close_truncated_dangling_key_and_separator() {
        assert_eq!(close_truncated(r#"{"a": 1, "b":"#), r#"{"a": 1}"#);
        assert_eq!(close_truncated(r#"{"a": 1, "b"#), r#"{"a": 1}"#);
        assert_eq!(close_truncated(r#"{"a": 1,"#), r#"{"a": 1}"#);
    }

    #[test]
    fn test_close_truncated_nested() {
        assert_eq!(
            close_truncated(r#"{"insights": [{"hook": "x"}, {"ho"#),
            r#"{"insights": [{"hook": "x"}]}"#
        );
        assert_eq!(close_truncated("[[1, 2], [3"), "[[1, 2], [3]]");
    }

    #[test]
    fn test_close_truncated_leaves_complete_documents() {
        assert_eq!(close_truncated(r#"{"a": "}"}"#), r#"{"a": "}"}"#);
    }

    #[test]
    fn test_parse_json_clean() {
        let pair: Pair = parse_json(r#"{"a": 1, "b": [2]}"#).unwrap();
        assert_eq!(pair, Pair { a: 1, b: vec![2] });
    }

    #[test]
    fn test_parse_json_repairs_everything_at_once() {
        let text = "Here is the result:\n```json\n{\n  \"a\": 7, // seven\n  \"b\": [1, 2,";
        let pair: Pair = parse_json(text).unwrap();
        assert_eq!(pair, Pair { a: 7, b: vec![1, 2] });
    }

    #[test]
    fn test_parse_json_skips_bracketed_prose() {
        let text = "Here are [3] insights:\n{\"a\": 4, \"b\": [1, 2, 3]}";
        let pair: Pair = parse_json(text).unwrap();
        assert_eq!(pair, Pair { a: 4, b: vec![1, 2, 3] });

        let text = "Notes {draft} and [v2]:\n```json\n{\"a\": 5}\n```";
        let pair: Pair = parse_json(text).unwrap();
        assert_eq!(pair.a, 5);
    }

    #[test]
    fn test_parse_json_missing_comma_between_items() {
        #[derive(Debug, Deserialize)]
        struct Wrapped {
            insights: Vec<Pair>,
        }
        let wrapped: Wrapped = parse_json("{\"insights\": [{\"a\": 1}\n{\"a\": 2}]}").unwrap();
        assert_eq!(wrapped.insights.len(), 2);
        assert_eq!(wrapped.insights[1].a, 2);
    }

    #[test]
    fn test_candidate_starts_stop_at_unclosed_region() {
        assert_eq!(candidate_starts("x [1] y {\"a\": [2"), vec![2, 8]);
        assert_eq!(candidate_starts("nothing"), Vec::<usize>::new());
    }

    #[test]
    fn test_parse_json_no_content() {
        let err = parse_json::<Pair>("").unwrap_err();
        assert!(!err.is_partial());

        let err = parse_json::<Pair>("I cannot help with that.").unwrap_err();
        assert!(!err.is_partial());
    }

    #[test]
    fn test_parse_json_partial() {
        let err = parse_json::<Pair>(r#"{"b": [1]}"#).unwrap_err();
        assert!(err.is_partial());
    }
}
