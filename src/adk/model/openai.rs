// SPDX-License-Identifier: MIT

//! OpenAI-compatible caller - chat completions and image generation

use super::{Content, ModelCaller, ModelOutput, ModelRequest, Part, VisionRequest, VlmMode};
use crate::adk::error::ModelError;
use crate::deckflow::config::Settings;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde_json::{json, Value};
use std::path::Path;

/// Caller for any endpoint speaking the OpenAI REST dialect
pub struct OpenAICompatibleCaller {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAICompatibleCaller {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.api_url.clone(), settings.api_key.clone())
    }

    /// Convert internal Content to an OpenAI message, inlining images as data URLs
    async fn content_to_openai_message(content: &Content) -> Result<Value, ModelError> {
        let role = match content.role.as_str() {
            "model" => "assistant",
            other => other,
        };

        let has_images = content
            .parts
            .iter()
            .any(|p| matches!(p, Part::Image { .. }));
        if !has_images {
            return Ok(json!({ "role": role, "content": content.text_content() }));
        }

        let mut parts = Vec::with_capacity(content.parts.len());
        for part in &content.parts {
            match part {
                Part::Text(text) => parts.push(json!({ "type": "text", "text": text })),
                Part::Image { path, detail } => {
                    parts.push(json!({
                        "type": "image_url",
                        "image_url": {
                            "url": encode_image(path).await?,
                            "detail": detail.as_str(),
                        }
                    }));
                }
            }
        }
        Ok(json!({ "role": role, "content": parts }))
    }

    fn parse_chat_response(response: &Value) -> Result<String, ModelError> {
        let choice = response["choices"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| ModelError::InvalidResponse("no choices in response".into()))?;

        choice["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ModelError::InvalidResponse("choice has no text content".into()))
    }

    async fn post(
        &self,
        url: &str,
        body: &Value,
        request: &ModelRequest,
    ) -> Result<Value, ModelError> {
        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .timeout(request.timeout)
            .json(body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, request))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ModelError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))
    }

    async fn chat(&self, request: &ModelRequest) -> Result<ModelOutput, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut messages = Vec::with_capacity(request.messages.len());
        for content in &request.messages {
            messages.push(Self::content_to_openai_message(content).await?);
        }

        let mut body = json!({
            "model": request.model,
            "messages": messages,
        });
        if let Some(temp) = request.generation.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max_tokens) = request.generation.max_output_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = request.generation.top_p {
            body["top_p"] = json!(top_p);
        }
        if request.bind_tools {
            log::debug!(
                "Role '{}' asked for tool binding; no tool schemas are forwarded",
                request.role_name
            );
        }

        let resp = self.post(&url, &body, request).await?;
        log::debug!("Chat response for '{}': {}", request.role_name, resp);
        Self::parse_chat_response(&resp).map(ModelOutput::Text)
    }

    async fn generate_image(
        &self,
        request: &ModelRequest,
        vision: &VisionRequest,
    ) -> Result<ModelOutput, ModelError> {
        let url = format!("{}/images/generations", self.base_url);
        let prompt = request
            .messages
            .iter()
            .filter(|c| c.role != "system")
            .map(Content::text_content)
            .collect::<Vec<_>>()
            .join("\n");

        let (w, h) = vision.max_image_size;
        let mut body = json!({
            "model": request.model,
            "prompt": prompt,
            "n": 1,
            "size": format!("{}x{}", w, h),
            "response_format": "b64_json",
        });
        for (k, v) in &vision.params {
            body[k] = v.clone();
        }

        let resp = self.post(&url, &body, request).await?;
        let encoded = resp["data"]
            .as_array()
            .and_then(|d| d.first())
            .and_then(|d| d["b64_json"].as_str())
            .ok_or_else(|| ModelError::InvalidResponse("no b64_json image in response".into()))?;
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        if let Some(parent) = vision.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&vision.output_path, bytes).await?;
        log::info!(
            "Wrote generated image for '{}' to {}",
            request.role_name,
            vision.output_path.display()
        );
        Ok(ModelOutput::Asset(vision.output_path.clone()))
    }
}

#[async_trait]
impl ModelCaller for OpenAICompatibleCaller {
    async fn call(&self, request: &ModelRequest) -> Result<ModelOutput, ModelError> {
        match &request.vision {
            Some(vision) if vision.mode.produces_asset() => {
                if vision.mode == VlmMode::Edit {
                    return Err(ModelError::Unsupported(
                        "image edit is not available on the chat-completions dialect".into(),
                    ));
                }
                self.generate_image(request, vision).await
            }
            _ => self.chat(request).await,
        }
    }
}

fn map_reqwest_error(err: reqwest::Error, request: &ModelRequest) -> ModelError {
    if err.is_timeout() {
        ModelError::Timeout {
            secs: request.timeout.as_secs(),
        }
    } else {
        ModelError::Network(err.to_string())
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

async fn encode_image(path: &Path) -> Result<String, ModelError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(format!(
        "data:{};base64,{}",
        mime_for(path),
        STANDARD.encode(bytes)
    ))
}
