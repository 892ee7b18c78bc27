// SPDX-License-Identifier: MIT

//! Settings and prompt-library loading from YAML files

use crate::deckflow::error::FlowError;
use crate::deckflow::agent::PromptLibrary;
use crate::deckflow::config::Settings;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Loads settings and prompt templates from YAML files
pub struct WorkflowLoader;

impl WorkflowLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load settings from a YAML file, then overlay the environment
    pub fn load_settings<P: AsRef<Path>>(&self, path: P) -> Result<Settings, FlowError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let mut settings = Self::parse_settings_yaml(&content)?;
        settings.apply_env()?;
        log::info!(
            "Loaded settings from {} ({} agent overrides)",
            path.display(),
            settings.agents.len()
        );
        Ok(settings)
    }

    /// Parse settings from a YAML string; missing fields keep their defaults
    pub fn parse_settings_yaml(content: &str) -> Result<Settings, FlowError> {
        if content.trim().is_empty() {
            return Ok(Settings::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load a `name: template` mapping
    pub fn load_prompts<P: AsRef<Path>>(&self, path: P) -> Result<PromptLibrary, FlowError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let prompts = Self::parse_prompt_yaml(&content)?;
        log::info!("Loaded {} prompts from {}", prompts.len(), path.display());
        Ok(prompts)
    }

    pub fn parse_prompt_yaml(content: &str) -> Result<PromptLibrary, FlowError> {
        let templates: HashMap<String, String> = serde_yaml::from_str(content)?;
        Ok(PromptLibrary::from_map(templates))
    }
}

impl Default for WorkflowLoader {
    fn default() -> Self {
        Self::new()
    }
}
