// SPDX-License-Identifier: MIT

//! Model module - the Tool/Model Caller contract
//!
//! The orchestration core never talks to a provider directly; it builds a
//! [ModelRequest] and hands it to a [ModelCaller]. Implementations:
//! - [openai] - OpenAI-compatible chat/images HTTP API

pub mod openai;

use crate::adk::error::ModelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for model generation
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub top_p: Option<f32>,
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text("system", text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text("user", text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text("assistant", text)
    }

    /// Concatenated text of all text parts
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                Part::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Parts of a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Part {
    Text(String),
    /// Local image attached to the message
    Image { path: PathBuf, detail: ImageDetail },
}

/// Tool-invocation mode forwarded to the caller
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolMode {
    #[default]
    Auto,
    None,
    Required,
}

/// Vision sub-mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VlmMode {
    #[default]
    Understanding,
    Generation,
    Edit,
}

impl VlmMode {
    /// Generation and edit produce an image asset instead of text
    pub fn produces_asset(&self) -> bool {
        matches!(self, VlmMode::Generation | VlmMode::Edit)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Low,
    High,
    #[default]
    Auto,
}

impl ImageDetail {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageDetail::Low => "low",
            ImageDetail::High => "high",
            ImageDetail::Auto => "auto",
        }
    }
}

/// Image-output parameters for generation/edit calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionRequest {
    pub mode: VlmMode,
    pub detail: ImageDetail,
    pub max_image_size: (u32, u32),
    /// Where the caller must write the produced asset
    pub output_path: PathBuf,
    /// Source images for edit mode
    pub input_images: Vec<PathBuf>,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// One fully rendered call
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Agent role issuing the call
    pub role_name: String,
    pub model: String,
    pub messages: Vec<Content>,
    pub generation: GenerationConfig,
    pub tool_mode: ToolMode,
    pub bind_tools: bool,
    pub timeout: Duration,
    /// Present only for image-producing VLM calls
    pub vision: Option<VisionRequest>,
}

/// What a caller hands back
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    Text(String),
    /// Path of a binary asset written by the caller
    Asset(PathBuf),
}

/// Core trait for model callers
///
/// Must be safe to invoke concurrently for distinct requests.
#[async_trait]
pub trait ModelCaller: Send + Sync {
    async fn call(&self, request: &ModelRequest) -> Result<ModelOutput, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_content_skips_images() {
        let content = Content {
            role: "user".into(),
            parts: vec![
                Part::Text("look at ".into()),
                Part::Image {
                    path: PathBuf::from("slide.png"),
                    detail: ImageDetail::High,
                },
                Part::Text("this".into()),
            ],
        };
        assert_eq!(content.text_content(), "look at this");
    }

    #[test]
    fn test_modes_deserialize_lowercase() {
        let mode: VlmMode = serde_yaml::from_str("generation").unwrap();
        assert_eq!(mode, VlmMode::Generation);
        assert!(mode.produces_asset());
        assert!(!VlmMode::Understanding.produces_asset());

        let tool_mode: ToolMode = serde_yaml::from_str("required").unwrap();
        assert_eq!(tool_mode, ToolMode::Required);
    }
}
