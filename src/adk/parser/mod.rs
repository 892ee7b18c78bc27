// SPDX-License-Identifier: MIT

//! Structured-output parsers
//!
//! - [json] - fault-tolerant JSON recovery ([parse_flexible])
//! - [xml] - tag extraction into a JSON object

pub mod json;
pub mod xml;

pub use json::parse_flexible;
pub use xml::parse_xml;

use crate::adk::error::ParseError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which parser turns a raw reply into a value
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    #[default]
    Json,
    Xml,
    Text,
}

/// Parser sub-configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ParserConfig {
    pub merge_dicts: bool,
    pub strip_double_braces: bool,
    /// Keys the parsed object must contain
    pub required_fields: Vec<String>,
    /// XML only: element whose children form the result
    pub root_tag: Option<String>,
}

/// Parse a raw model reply with the configured parser
pub fn parse_output(
    kind: ParserKind,
    config: &ParserConfig,
    text: &str,
) -> Result<Value, ParseError> {
    let value = match kind {
        ParserKind::Json => parse_flexible(text, config.merge_dicts, config.strip_double_braces)?,
        ParserKind::Xml => parse_xml(text, config.root_tag.as_deref())?,
        ParserKind::Text => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(ParseError::EmptyInput);
            }
            Value::String(trimmed.to_string())
        }
    };

    if !config.required_fields.is_empty() {
        let obj = value.as_object().ok_or(ParseError::NotAnObject)?;
        let missing: Vec<String> = config
            .required_fields
            .iter()
            .filter(|f| !obj.contains_key(f.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ParseError::MissingFields(missing));
        }
    }

    Ok(value)
}
