// SPDX-License-Identifier: MIT

//! Typed error handling for deckflow-rs
//!
//! Every layer has its own enum; [FlowError] is what node functions and
//! workflow runs return, and converts from all of them.

use thiserror::Error;

pub use crate::adk::error::{ModelError, ParseError};
use crate::deckflow::agent::ItemOutcome;
use crate::deckflow::workflow::state::ExecutionState;

/// Top-level error type for deckflow-rs
#[derive(Debug, Error)]
pub enum FlowError {
    /// Workflow graph errors (build, routing, node failure)
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Agent execution errors
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// Structured-output parsing errors
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Model caller errors
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Configuration errors (missing env vars, invalid config)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error raised by node code
    #[error("{0}")]
    Other(String),
}

/// Workflow graph errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Build-time validation failure
    #[error("Invalid graph: {0}")]
    GraphInvalid(String),

    /// No workflow registered under this name
    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    /// A workflow with this name is already registered
    #[error("Workflow already registered: {0}")]
    DuplicateWorkflow(String),

    /// A router returned a name that is neither a node nor the terminal sentinel
    #[error("Router on '{from}' returned unknown node '{target}'")]
    UnknownRoute { from: String, target: String },

    /// A node function failed; `last_state` is the state as it was before the node ran
    #[error("Node '{node}' failed: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: Box<FlowError>,
        last_state: Box<ExecutionState>,
    },

    /// The configured step ceiling was hit
    #[error("Step limit exceeded: {limit}")]
    StepLimitExceeded { limit: usize },

    /// The run's cancellation token fired
    #[error("Workflow cancelled at node '{node}'")]
    Cancelled { node: String },
}

/// Agent execution errors
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),

    #[error("Failed to render prompt '{template}': {message}")]
    PromptRender { template: String, message: String },

    #[error("Tool call failed: {0}")]
    ToolCall(#[from] ModelError),

    #[error("Agent '{role}' produced unparseable output: {source}")]
    Parse {
        role: String,
        #[source]
        source: ParseError,
    },

    #[error("Agent '{role}' failed validation after {attempts} attempts: {diagnostic}")]
    ValidationExhausted {
        role: String,
        attempts: u32,
        diagnostic: String,
    },

    /// Parallel mode: some items failed; `state` is the state the batch started from
    #[error("Agent '{role}' batch failed for {} of {} items", failed_count(.outcomes), .outcomes.len())]
    PartialBatchFailure {
        role: String,
        outcomes: Vec<ItemOutcome>,
        state: Box<ExecutionState>,
    },

    #[error("Agent '{role}' expected a list under '{key}'")]
    MissingBatchInput { role: String, key: String },

    #[error("Sub-workflow failed: {0}")]
    SubWorkflow(Box<FlowError>),

    #[error("Agent '{role}' cancelled")]
    Cancelled { role: String },

    #[error("Agent '{role}' received unexpected output: {message}")]
    UnexpectedOutput { role: String, message: String },
}

fn failed_count(outcomes: &[ItemOutcome]) -> usize {
    outcomes.iter().filter(|o| o.result.is_err()).count()
}

impl From<&str> for FlowError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<String> for FlowError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}
