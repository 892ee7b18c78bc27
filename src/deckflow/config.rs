// SPDX-License-Identifier: MIT

//! Runtime settings
//!
//! Later sources win: built-in defaults, then a YAML file
//! (see [crate::deckflow::workflow::WorkflowLoader]), then the environment.

use crate::deckflow::agent::ExecutionConfig;
use crate::deckflow::error::FlowError;
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of an OpenAI-compatible API
    pub api_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub default_model: String,
    pub request_timeout_secs: u64,
    pub default_concurrency_limit: usize,
    /// Step ceiling for workflow runs; unset means unlimited
    pub max_steps: Option<usize>,
    /// Artifacts land in `<output_root>/<run_id>` unless the state names a path
    pub output_root: PathBuf,
    /// Per-role execution overrides
    pub agents: HashMap<String, ExecutionConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            default_model: "gpt-4o".to_string(),
            request_timeout_secs: 120,
            default_concurrency_limit: 5,
            max_steps: None,
            output_root: PathBuf::from("outputs"),
            agents: HashMap::new(),
        }
    }
}

impl Settings {
    /// Defaults overlaid with the environment (a `.env` file is loaded first)
    pub fn from_env() -> Result<Self, FlowError> {
        let mut settings = Self::default();
        settings.apply_env()?;
        Ok(settings)
    }

    /// Overlay `DECKFLOW_*` environment variables onto these settings
    pub fn apply_env(&mut self) -> Result<(), FlowError> {
        dotenv().ok();
        self.apply_vars(|key| env::var(key).ok())
    }

    /// Overlay values from an arbitrary variable source
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<(), FlowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("DECKFLOW_API_URL") {
            self.api_url = url.trim_end_matches('/').to_string();
        }
        if let Some(key) = get("DECKFLOW_API_KEY").or_else(|| get("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(model) = get("DECKFLOW_MODEL") {
            self.default_model = model;
        }
        if let Some(raw) = get("DECKFLOW_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_var("DECKFLOW_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = get("DECKFLOW_CONCURRENCY") {
            self.default_concurrency_limit = parse_var("DECKFLOW_CONCURRENCY", &raw)?;
        }
        if let Some(raw) = get("DECKFLOW_MAX_STEPS") {
            self.max_steps = Some(parse_var("DECKFLOW_MAX_STEPS", &raw)?);
        }
        if let Some(root) = get("DECKFLOW_OUTPUT_ROOT") {
            self.output_root = PathBuf::from(root);
        }
        Ok(())
    }

    /// The configured override for `role`, or `fallback`
    pub fn agent_config(&self, role: &str, fallback: ExecutionConfig) -> ExecutionConfig {
        match self.agents.get(role) {
            Some(config) => {
                log::debug!("Using configured {} mode for '{}'", config.mode_name(), role);
                config.clone()
            }
            None => fallback,
        }
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T, FlowError> {
    raw.trim()
        .parse()
        .map_err(|_| FlowError::Config(format!("{} has an invalid value: '{}'", key, raw)))
}
