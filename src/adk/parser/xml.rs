// SPDX-License-Identifier: MIT

//! Tag extraction for XML-flavoured model output
//!
//! Not a conforming XML parser: it pulls `<tag>…</tag>` pairs out of free
//! text, which is what prompts asking for tagged answers get back.

use super::json::strip_outer_fence;
use crate::adk::error::ParseError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static OPEN_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<([A-Za-z_][\w\-.]*)(?:\s[^<>]*?)?(/?)>").expect("valid open-tag regex")
});

/// Turn tagged text into a JSON object.
///
/// `root_tag` narrows parsing to the inside of the first matching element.
pub fn parse_xml(text: &str, root_tag: Option<&str>) -> Result<Value, ParseError> {
    let mut body = strip_outer_fence(text.trim());
    if body.is_empty() {
        return Err(ParseError::EmptyInput);
    }

    if let Some(root) = root_tag {
        match element_inner(body, root) {
            Some(inner) => body = inner,
            None => log::debug!("Root tag <{}> not found, parsing whole output", root),
        }
    }

    parse_elements(body)
        .map(Value::Object)
        .ok_or(ParseError::NoXmlFound)
}

fn element_inner<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    let mut cursor = 0;
    while let Some(caps) = OPEN_TAG.captures(&s[cursor..]) {
        let whole = caps.get(0)?;
        let start = cursor + whole.end();
        if &caps[1] == name && caps[2].is_empty() {
            let (end, _) = find_close(s, start, name)?;
            return Some(&s[start..end]);
        }
        cursor = start;
    }
    None
}

fn parse_elements(s: &str) -> Option<Map<String, Value>> {
    let mut map = Map::new();
    let mut cursor = 0;

    while let Some(caps) = OPEN_TAG.captures(&s[cursor..]) {
        let whole = caps.get(0)?;
        let name = caps[1].to_string();
        let start = cursor + whole.end();

        if !caps[2].is_empty() {
            insert_repeated(&mut map, name, Value::String(String::new()));
            cursor = start;
            continue;
        }

        match find_close(s, start, &name) {
            Some((end, after)) => {
                let value = element_value(&s[start..end]);
                insert_repeated(&mut map, name, value);
                cursor = after;
            }
            None => {
                log::warn!("Unclosed <{}> in model output, skipping", name);
                cursor = start;
            }
        }
    }

    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

/// Locate the close tag matching an open tag whose content starts at `from`,
/// counting nested elements of the same name. Returns (content end, position after close).
fn find_close(s: &str, from: usize, name: &str) -> Option<(usize, usize)> {
    let open = format!("<{}", name);
    let close = format!("</{}>", name);
    let mut depth = 1usize;
    let mut pos = from;

    loop {
        let close_at = pos + s[pos..].find(&close)?;
        depth += count_opens(&s[pos..close_at], &open);
        depth -= 1;
        if depth == 0 {
            return Some((close_at, close_at + close.len()));
        }
        pos = close_at + close.len();
    }
}

fn count_opens(segment: &str, open: &str) -> usize {
    segment
        .match_indices(open)
        .filter(|(i, _)| {
            matches!(
                segment[i + open.len()..].chars().next(),
                Some('>') | Some(' ') | Some('\t') | Some('\n') | Some('\r')
            )
        })
        .count()
}

fn element_value(inner: &str) -> Value {
    let trimmed = inner.trim();
    if let Some(cdata) = trimmed
        .strip_prefix("<![CDATA[")
        .and_then(|rest| rest.strip_suffix("]]>"))
    {
        return Value::String(cdata.to_string());
    }
    match parse_elements(trimmed) {
        Some(children) => Value::Object(children),
        None => Value::String(trimmed.to_string()),
    }
}

fn insert_repeated(map: &mut Map<String, Value>, name: String, value: Value) {
    match map.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_tags() {
        let v = parse_xml("Here you go:\n<title>Intro</title>\n<summary> Short </summary>", None)
            .unwrap();
        assert_eq!(v, json!({"title": "Intro", "summary": "Short"}));
    }

    #[test]
    fn test_nested_and_repeated() {
        let text = r#"```xml
<slide id="1">
  <title>Results</title>
  <bullet>faster</bullet>
  <bullet>cheaper</bullet>
  <bullet>smaller</bullet>
</slide>
```"#;
        let v = parse_xml(text, None).unwrap();
        assert_eq!(
            v,
            json!({"slide": {"title": "Results", "bullet": ["faster", "cheaper", "smaller"]}})
        );
    }

    #[test]
    fn test_root_tag_narrows() {
        let text = "<answer><code>print(1)</code><lang>py</lang></answer>";
        let v = parse_xml(text, Some("answer")).unwrap();
        assert_eq!(v, json!({"code": "print(1)", "lang": "py"}));
    }

    #[test]
    fn test_same_name_nesting() {
        let v = parse_xml("<section><section>inner</section></section>", None).unwrap();
        assert_eq!(v, json!({"section": {"section": "inner"}}));
    }

    #[test]
    fn test_cdata_unwrapped() {
        let v = parse_xml("<code><![CDATA[if a < b { x }]]></code>", None).unwrap();
        assert_eq!(v, json!({"code": "if a < b { x }"}));
    }

    #[test]
    fn test_no_tags() {
        assert_eq!(
            parse_xml("just prose, a < b", None),
            Err(ParseError::NoXmlFound)
        );
        assert_eq!(parse_xml("  ", None), Err(ParseError::EmptyInput));
    }
}
