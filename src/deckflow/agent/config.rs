// SPDX-License-Identifier: MIT

//! Execution configuration: one tagged variant per execution strategy
//!
//! Deserializes from YAML with a `mode` tag:
//!
//! ```yaml
//! mode: react
//! model_name: gpt-4o
//! max_retries: 2
//! parser_config:
//!   required_fields: [title]
//! ```

use super::retry::Backoff;
use super::validator::{Validator, Validators};
use crate::adk::model::{ImageDetail, ToolMode, VlmMode};
use crate::adk::parser::{ParserConfig, ParserKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// Fields shared by every execution mode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommonConfig {
    /// Falls back to the configured default model
    pub model_name: Option<String>,
    pub temperature: f32,
    /// Nucleus sampling; left to the provider when unset
    pub top_p: Option<f32>,
    pub max_tokens: u32,
    pub tool_mode: ToolMode,
    pub parser_type: ParserKind,
    pub parser_config: ParserConfig,
    /// When false, the run's message history is sent and extended
    pub ignore_history: bool,
    /// Per-call timeout; falls back to the configured request timeout
    pub timeout_secs: Option<u64>,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            model_name: None,
            temperature: 0.0,
            top_p: None,
            max_tokens: 16384,
            tool_mode: ToolMode::Auto,
            parser_type: ParserKind::Json,
            parser_config: ParserConfig::default(),
            ignore_history: true,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleConfig {
    #[serde(flatten)]
    pub common: CommonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactConfig {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub max_retries: u32,
    #[serde(skip)]
    pub validators: Validators,
    pub backoff: Backoff,
}

impl Default for ReactConfig {
    fn default() -> Self {
        Self {
            common: CommonConfig::default(),
            max_retries: 3,
            validators: Validators::default(),
            backoff: Backoff::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    #[serde(flatten)]
    pub common: CommonConfig,
    /// Registered sub-workflow to delegate to
    pub workflow: String,
    pub enable_react_validation: bool,
    pub react_max_retries: u32,
    #[serde(skip)]
    pub validators: Validators,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            common: CommonConfig::default(),
            workflow: String::new(),
            enable_react_validation: false,
            react_max_retries: 3,
            validators: Validators::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VlmConfig {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub vlm_mode: VlmMode,
    pub image_detail: ImageDetail,
    pub max_image_size: (u32, u32),
    pub input_images: Vec<PathBuf>,
    /// Where generation writes its asset; derived from the run's result root when unset
    pub output_image: Option<PathBuf>,
    /// Forwarded to the caller; an `input_image` entry is attached as an extra image
    pub additional_params: Map<String, Value>,
    /// Validation retries; 0 with no validators means a single-shot call
    pub max_retries: u32,
    #[serde(skip)]
    pub validators: Validators,
    pub backoff: Backoff,
}

impl Default for VlmConfig {
    fn default() -> Self {
        Self {
            common: CommonConfig::default(),
            vlm_mode: VlmMode::Understanding,
            image_detail: ImageDetail::Auto,
            max_image_size: (1024, 1024),
            input_images: Vec::new(),
            output_image: None,
            additional_params: Map::new(),
            max_retries: 0,
            validators: Validators::default(),
            backoff: Backoff::default(),
        }
    }
}

impl VlmConfig {
    /// Whether the call runs through the validation retry loop
    pub fn uses_validation(&self) -> bool {
        self.max_retries > 0 || !self.validators.is_empty()
    }
}

/// What a parallel batch does with items that still fail after their retries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemFailurePolicy {
    /// Abort the batch with `PartialBatchFailure`; the state is left untouched
    #[default]
    Fail,
    /// Merge only successful items
    Drop,
    /// Merge with `null` at failed positions, keeping index alignment
    Placeholder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    #[serde(flatten)]
    pub common: CommonConfig,
    /// Unset falls back to `Settings::default_concurrency_limit`
    pub concurrency_limit: Option<usize>,
    /// Key under extra params (or pre-tool results) holding the item list
    pub items_key: String,
    pub item_retries: u32,
    pub on_item_failure: ItemFailurePolicy,
    pub backoff: Backoff,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            common: CommonConfig::default(),
            concurrency_limit: None,
            items_key: "items".to_string(),
            item_retries: 0,
            on_item_failure: ItemFailurePolicy::Fail,
            backoff: Backoff::default(),
        }
    }
}

/// Execution strategy for one agent turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ExecutionConfig {
    Simple(SimpleConfig),
    React(ReactConfig),
    Graph(GraphConfig),
    Vlm(VlmConfig),
    Parallel(ParallelConfig),
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self::simple()
    }
}

impl ExecutionConfig {
    pub fn simple() -> Self {
        Self::Simple(SimpleConfig::default())
    }

    pub fn react(max_retries: u32) -> Self {
        Self::React(ReactConfig {
            max_retries,
            ..ReactConfig::default()
        })
    }

    pub fn graph(workflow: impl Into<String>) -> Self {
        Self::Graph(GraphConfig {
            workflow: workflow.into(),
            ..GraphConfig::default()
        })
    }

    pub fn vlm(mode: VlmMode) -> Self {
        Self::Vlm(VlmConfig {
            vlm_mode: mode,
            ..VlmConfig::default()
        })
    }

    pub fn parallel(concurrency_limit: usize) -> Self {
        Self::Parallel(ParallelConfig {
            concurrency_limit: Some(concurrency_limit),
            ..ParallelConfig::default()
        })
    }

    pub fn mode_name(&self) -> &'static str {
        match self {
            Self::Simple(_) => "simple",
            Self::React(_) => "react",
            Self::Graph(_) => "graph",
            Self::Vlm(_) => "vlm",
            Self::Parallel(_) => "parallel",
        }
    }

    pub fn common(&self) -> &CommonConfig {
        match self {
            Self::Simple(c) => &c.common,
            Self::React(c) => &c.common,
            Self::Graph(c) => &c.common,
            Self::Vlm(c) => &c.common,
            Self::Parallel(c) => &c.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut CommonConfig {
        match self {
            Self::Simple(c) => &mut c.common,
            Self::React(c) => &mut c.common,
            Self::Graph(c) => &mut c.common,
            Self::Vlm(c) => &mut c.common,
            Self::Parallel(c) => &mut c.common,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.common_mut().model_name = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.common_mut().temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.common_mut().top_p = Some(top_p);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.common_mut().max_tokens = max_tokens;
        self
    }

    pub fn with_tool_mode(mut self, tool_mode: ToolMode) -> Self {
        self.common_mut().tool_mode = tool_mode;
        self
    }

    pub fn with_parser(mut self, kind: ParserKind) -> Self {
        self.common_mut().parser_type = kind;
        self
    }

    pub fn with_parser_config(mut self, parser_config: ParserConfig) -> Self {
        self.common_mut().parser_config = parser_config;
        self
    }

    pub fn with_ignore_history(mut self, ignore: bool) -> Self {
        self.common_mut().ignore_history = ignore;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.common_mut().timeout_secs = Some(secs);
        self
    }

    /// Append a validator. Simple and Parallel modes do not validate.
    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        let validator: Arc<dyn Validator> = Arc::new(validator);
        let mode = self.mode_name();
        match &mut self {
            Self::React(c) => c.validators.push(validator),
            Self::Graph(c) => c.validators.push(validator),
            Self::Vlm(c) => c.validators.push(validator),
            Self::Simple(_) | Self::Parallel(_) => log::warn!(
                "Validator '{}' ignored: {} mode does not validate",
                validator.name(),
                mode
            ),
        }
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        match &mut self {
            Self::React(c) => c.backoff = backoff,
            Self::Vlm(c) => c.backoff = backoff,
            Self::Parallel(c) => c.backoff = backoff,
            Self::Simple(_) | Self::Graph(_) => {}
        }
        self
    }

    /// Graph mode: re-run the sub-workflow until its result validates
    pub fn with_react_validation(mut self, max_retries: u32) -> Self {
        if let Self::Graph(c) = &mut self {
            c.enable_react_validation = true;
            c.react_max_retries = max_retries;
        }
        self
    }

    pub fn with_images<I, P>(mut self, images: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        if let Self::Vlm(c) = &mut self {
            c.input_images.extend(images.into_iter().map(Into::into));
        }
        self
    }

    pub fn with_output_image(mut self, path: impl Into<PathBuf>) -> Self {
        if let Self::Vlm(c) = &mut self {
            c.output_image = Some(path.into());
        }
        self
    }

    pub fn with_image_detail(mut self, detail: ImageDetail) -> Self {
        if let Self::Vlm(c) = &mut self {
            c.image_detail = detail;
        }
        self
    }

    pub fn with_max_image_size(mut self, width: u32, height: u32) -> Self {
        if let Self::Vlm(c) = &mut self {
            c.max_image_size = (width, height);
        }
        self
    }

    /// VLM validation retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        match &mut self {
            Self::React(c) => c.max_retries = max_retries,
            Self::Vlm(c) => c.max_retries = max_retries,
            Self::Graph(c) => c.react_max_retries = max_retries,
            Self::Simple(_) | Self::Parallel(_) => {}
        }
        self
    }

    pub fn with_items_key(mut self, key: impl Into<String>) -> Self {
        if let Self::Parallel(c) = &mut self {
            c.items_key = key.into();
        }
        self
    }

    pub fn with_item_retries(mut self, retries: u32) -> Self {
        if let Self::Parallel(c) = &mut self {
            c.item_retries = retries;
        }
        self
    }

    pub fn with_failure_policy(mut self, policy: ItemFailurePolicy) -> Self {
        if let Self::Parallel(c) = &mut self {
            c.on_item_failure = policy;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deckflow::agent::validator::NonEmpty;

    #[test]
    fn test_defaults() {
        let config = ExecutionConfig::simple();
        let common = config.common();
        assert_eq!(common.temperature, 0.0);
        assert_eq!(common.max_tokens, 16384);
        assert_eq!(common.tool_mode, ToolMode::Auto);
        assert_eq!(common.parser_type, ParserKind::Json);
        assert!(common.ignore_history);

        match ExecutionConfig::react(3) {
            ExecutionConfig::React(c) => assert_eq!(c.max_retries, 3),
            other => panic!("unexpected mode {}", other.mode_name()),
        }
        match ExecutionConfig::parallel(5) {
            ExecutionConfig::Parallel(c) => {
                assert_eq!(c.concurrency_limit, Some(5));
                assert_eq!(c.items_key, "items");
                assert_eq!(c.on_item_failure, ItemFailurePolicy::Fail);
            }
            other => panic!("unexpected mode {}", other.mode_name()),
        }
        match ExecutionConfig::vlm(VlmMode::Understanding) {
            ExecutionConfig::Vlm(c) => {
                assert_eq!(c.max_image_size, (1024, 1024));
                assert!(!c.uses_validation());
            }
            other => panic!("unexpected mode {}", other.mode_name()),
        }
    }

    #[test]
    fn test_yaml_tagged_variants() {
        let yaml = r#"
mode: react
model_name: gpt-4o-mini
temperature: 0.3
max_retries: 2
parser_type: xml
parser_config:
  root_tag: answer
"#;
        let config: ExecutionConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mode_name(), "react");
        assert_eq!(config.common().model_name.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(config.common().parser_type, ParserKind::Xml);
        assert_eq!(
            config.common().parser_config.root_tag.as_deref(),
            Some("answer")
        );
        match config {
            ExecutionConfig::React(c) => {
                assert_eq!(c.max_retries, 2);
                assert!(c.validators.is_empty());
            }
            other => panic!("unexpected mode {}", other.mode_name()),
        }

        let yaml = "mode: parallel\nconcurrency_limit: 2\non_item_failure: placeholder";
        match serde_yaml::from_str::<ExecutionConfig>(yaml).unwrap() {
            ExecutionConfig::Parallel(c) => {
                assert_eq!(c.concurrency_limit, Some(2));
                assert_eq!(c.on_item_failure, ItemFailurePolicy::Placeholder);
                assert_eq!(c.common.max_tokens, 16384);
            }
            other => panic!("unexpected mode {}", other.mode_name()),
        }

        let yaml = "mode: vlm\nvlm_mode: generation\nimage_detail: high";
        match serde_yaml::from_str::<ExecutionConfig>(yaml).unwrap() {
            ExecutionConfig::Vlm(c) => {
                assert_eq!(c.vlm_mode, VlmMode::Generation);
                assert_eq!(c.image_detail, ImageDetail::High);
            }
            other => panic!("unexpected mode {}", other.mode_name()),
        }
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(serde_yaml::from_str::<ExecutionConfig>("mode: swarm").is_err());
    }

    #[test]
    fn test_fluent_setters() {
        let config = ExecutionConfig::react(1)
            .with_model("local-model")
            .with_temperature(0.7)
            .with_top_p(0.9)
            .with_ignore_history(false)
            .with_validator(NonEmpty);
        assert_eq!(config.common().model_name.as_deref(), Some("local-model"));
        assert_eq!(config.common().top_p, Some(0.9));
        assert!(!config.common().ignore_history);
        match config {
            ExecutionConfig::React(c) => assert_eq!(c.validators.len(), 1),
            other => panic!("unexpected mode {}", other.mode_name()),
        }

        // validators are dropped for modes that never validate
        let config = ExecutionConfig::simple().with_validator(NonEmpty);
        assert_eq!(config.mode_name(), "simple");

        let config = ExecutionConfig::vlm(VlmMode::Understanding).with_validator(NonEmpty);
        match config {
            ExecutionConfig::Vlm(c) => assert!(c.uses_validation()),
            other => panic!("unexpected mode {}", other.mode_name()),
        }
    }
}
