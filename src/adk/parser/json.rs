// SPDX-License-Identifier: MIT

//! Fault-tolerant JSON recovery for model output
//!
//! Model replies routinely arrive wrapped in Markdown fences, carry comments
//! and trailing commas, contain LaTeX with bare backslashes, or hold several
//! JSON documents back to back. [parse_flexible] cleans the text in a fixed
//! order and then tries three strategies: whole-string, JSON Lines, and
//! left-to-right fragment extraction.

use crate::adk::error::ParseError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*```[\w-]*\s*(.*?)```\s*$").expect("valid fence regex"));

/// Recover a JSON value from noisy model text.
///
/// Returns the single recovered value, or, when several fragments are found,
/// either their shallow merge (`merge_dicts` and all fragments are objects)
/// or the ordered list of fragments.
pub fn parse_flexible(
    text: &str,
    merge_dicts: bool,
    strip_double_braces: bool,
) -> Result<Value, ParseError> {
    let mut s = strip_outer_fence(text.trim()).to_string();
    s = strip_triple_quotes(&s).to_string();
    s = strip_json_word(&s).to_string();

    if strip_double_braces {
        s = s.replace("{{", "{").replace("}}", "}");
    }

    s = strip_trailing_commas(&strip_comments(&s)).trim().to_string();
    s = remove_control_chars(&s);
    s = normalize_backslashes(&s);

    if s.is_empty() {
        return Err(ParseError::EmptyInput);
    }
    log::debug!("Cleaned model output: {}", s);

    match serde_json::from_str::<Value>(&s) {
        Ok(value) => return Ok(value),
        Err(e) => log::debug!("Whole-string parse failed: {}", e),
    }

    if let Some(values) = parse_json_lines(&s) {
        return Ok(maybe_merge(values, merge_dicts));
    }

    let fragments = extract_fragments(&s);
    if fragments.is_empty() {
        return Err(ParseError::NoJsonFound);
    }
    log::debug!("Extracted {} JSON fragments", fragments.len());
    Ok(maybe_merge(fragments, merge_dicts))
}

/// Unwrap a fence only when it encloses the entire input
pub(crate) fn strip_outer_fence(s: &str) -> &str {
    match OUTER_FENCE.captures(s).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => s,
    }
}

fn strip_triple_quotes(s: &str) -> &str {
    let wrapped = s.len() >= 6
        && ((s.starts_with("'''") && s.ends_with("'''"))
            || (s.starts_with("\"\"\"") && s.ends_with("\"\"\"")));
    if wrapped {
        s[3..s.len() - 3].trim()
    } else {
        s
    }
}

fn strip_json_word(s: &str) -> &str {
    match s.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("json") => s[4..].trim_start(),
        _ => s,
    }
}

/// Remove `/* */` and `//` comments outside string literals.
/// A `//` directly after `:` is kept so bare URLs survive.
fn strip_comments(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match (c, chars.get(i + 1)) {
            ('"', _) => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            ('/', Some('*')) => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            ('/', Some('/')) if i == 0 || chars[i - 1] != ':' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Drop commas that directly precede a closing bracket (whitespace allowed between)
fn strip_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn remove_control_chars(s: &str) -> String {
    s.chars()
        .filter(|c| {
            !matches!(
                c,
                '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}' | '\u{7f}'
            )
        })
        .collect()
}

/// Keep valid escape pairs, double every other backslash
fn normalize_backslashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&next @ ('\\' | 'n' | 'r' | 't' | '"' | '/' | 'b' | 'f')) => {
                out.push('\\');
                out.push(next);
                chars.next();
            }
            _ => out.push_str("\\\\"),
        }
    }
    out
}

/// All non-empty lines must parse on their own, and there must be at least two
fn parse_json_lines(s: &str) -> Option<Vec<Value>> {
    let lines: Vec<&str> = s
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.len() < 2 {
        return None;
    }
    lines
        .into_iter()
        .map(|line| serde_json::from_str::<Value>(line).ok())
        .collect()
}

fn extract_fragments(s: &str) -> Vec<Value> {
    let mut fragments = Vec::new();
    let mut idx = 0;

    while idx < s.len() {
        let Some(offset) = s[idx..].find(|c: char| c == '{' || c == '[') else {
            break;
        };
        idx += offset;

        let mut stream = serde_json::Deserializer::from_str(&s[idx..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                let end = idx + stream.byte_offset();
                if is_fragment_boundary(&s[end..]) {
                    fragments.push(value);
                    idx = end;
                } else {
                    log::warn!("Rejected JSON fragment at byte {}: glued to trailing text", idx);
                    idx += 1;
                }
            }
            _ => idx += 1,
        }
    }
    fragments
}

fn is_fragment_boundary(rest: &str) -> bool {
    match rest.chars().next() {
        None => true,
        Some(c) => c.is_whitespace() || matches!(c, ',' | ']' | '}' | '>'),
    }
}

fn maybe_merge(mut values: Vec<Value>, merge_dicts: bool) -> Value {
    if values.len() == 1 {
        return values.remove(0);
    }
    if merge_dicts && values.iter().all(Value::is_object) {
        let mut merged = Map::new();
        for value in values {
            if let Value::Object(map) = value {
                merged.extend(map);
            }
        }
        return Value::Object(merged);
    }
    Value::Array(values)
}
