// SPDX-License-Identifier: MIT

//! Prompt templates and `{placeholder}` rendering

use crate::deckflow::error::AgentError;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Named prompt templates
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    templates: HashMap<String, String>,
}

impl PromptLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(templates: HashMap<String, String>) -> Self {
        Self { templates }
    }

    pub fn insert(&mut self, name: impl Into<String>, template: impl Into<String>) {
        self.templates.insert(name.into(), template.into());
    }

    pub fn with(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.insert(name, template);
        self
    }

    /// Add every template from `other`, replacing same-named ones
    pub fn extend(&mut self, other: PromptLibrary) {
        self.templates.extend(other.templates);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Render the named template
    pub fn render(&self, name: &str, params: &Map<String, Value>) -> Result<String, AgentError> {
        let template = self.get(name).ok_or_else(|| AgentError::PromptRender {
            template: name.to_string(),
            message: "template not found".to_string(),
        })?;
        render_template(name, template, params)
    }
}

/// Substitute `{name}` / `{a.b}` placeholders.
///
/// `{{` and `}}` render as literal braces, and a `{` that does not open a
/// well-formed placeholder is copied through. Strings render raw, other
/// values as compact JSON.
pub fn render_template(
    name: &str,
    template: &str,
    params: &Map<String, Value>,
) -> Result<String, AgentError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(|c: char| c == '{' || c == '}') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
        } else if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
        } else {
            match placeholder(&tail[1..]) {
                Some(key) => {
                    let value = lookup(params, key).ok_or_else(|| AgentError::PromptRender {
                        template: name.to_string(),
                        message: format!("missing parameter '{}'", key),
                    })?;
                    match value {
                        Value::String(s) => out.push_str(s),
                        other => out.push_str(&other.to_string()),
                    }
                    rest = &tail[key.len() + 2..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// The key of a placeholder starting right after `{`, if well formed
fn placeholder(s: &str) -> Option<&str> {
    let end = s.find('}')?;
    let key = &s[..end];
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && !key.ends_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    valid.then_some(key)
}

fn lookup<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    if let Some(value) = params.get(key) {
        return Some(value);
    }
    let mut parts = key.split('.');
    let mut current = params.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            other => other.get(part)?,
        };
    }
    Some(current)
}
