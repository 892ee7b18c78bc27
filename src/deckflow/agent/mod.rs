// SPDX-License-Identifier: MIT

//! Agent Execution Core
//!
//! An agent is a role name plus prompt templates and a result-merge hook
//! ([AgentRole]). [AgentExecutor::execute] runs one agent turn against an
//! [ExecutionState] using one of the [ExecutionConfig] strategies.

pub mod config;
pub mod executor;
pub mod parallel;
pub mod pre_tool;
pub mod prompt;
pub mod react;
pub mod registry;
pub mod retry;
pub mod validator;

pub use config::{
    CommonConfig, ExecutionConfig, GraphConfig, ItemFailurePolicy, ParallelConfig, ReactConfig,
    SimpleConfig, VlmConfig,
};
pub use executor::AgentExecutor;
pub use pre_tool::PreToolRegistry;
pub use prompt::{render_template, PromptLibrary};
pub use registry::AgentRegistry;
pub use retry::Backoff;
pub use validator::{NonEmpty, RequiredKeys, Validator, Validators};

use crate::deckflow::workflow::state::ExecutionState;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Core trait for agent roles
///
/// Only [AgentRole::role_name] is required. The result hook is the only
/// place a turn writes business data into the state.
pub trait AgentRole: Send + Sync {
    fn role_name(&self) -> &str;

    /// Name of the system prompt template in the prompt library
    fn system_prompt_template(&self) -> String {
        format!("system_prompt_for_{}", self.role_name())
    }

    /// Name of the task prompt template in the prompt library
    fn task_prompt_template(&self) -> String {
        format!("task_prompt_for_{}", self.role_name())
    }

    /// Fallback values for parameters no pre-tool supplied
    fn default_pre_tool_results(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Template parameters derived from the pre-tool results
    fn task_prompt_params(&self, pre_tool_results: &Map<String, Value>) -> Map<String, Value> {
        pre_tool_results.clone()
    }

    /// Merge a successful result into the state
    fn update_state_result(
        &self,
        state: &mut ExecutionState,
        result: Value,
        _pre_tool_results: &Map<String, Value>,
    ) {
        state.set_agent_result(self.role_name(), result);
    }
}

type ParamsFn = Arc<dyn Fn(&Map<String, Value>) -> Map<String, Value> + Send + Sync>;
type ResultFn = Arc<dyn Fn(&mut ExecutionState, Value, &Map<String, Value>) + Send + Sync>;

/// Closure-configured [AgentRole], for roles that need no type of their own
#[derive(Clone)]
pub struct AgentDefinition {
    role: String,
    system_template: Option<String>,
    task_template: Option<String>,
    defaults: Map<String, Value>,
    params: Option<ParamsFn>,
    on_result: Option<ResultFn>,
}

impl AgentDefinition {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            system_template: None,
            task_template: None,
            defaults: Map::new(),
            params: None,
            on_result: None,
        }
    }

    /// Override the template names
    pub fn with_templates(mut self, system: impl Into<String>, task: impl Into<String>) -> Self {
        self.system_template = Some(system.into());
        self.task_template = Some(task.into());
        self
    }

    pub fn with_defaults(mut self, defaults: Map<String, Value>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_params<F>(mut self, f: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Map<String, Value> + Send + Sync + 'static,
    {
        self.params = Some(Arc::new(f));
        self
    }

    pub fn on_result<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut ExecutionState, Value, &Map<String, Value>) + Send + Sync + 'static,
    {
        self.on_result = Some(Arc::new(f));
        self
    }
}

impl AgentRole for AgentDefinition {
    fn role_name(&self) -> &str {
        &self.role
    }

    fn system_prompt_template(&self) -> String {
        self.system_template
            .clone()
            .unwrap_or_else(|| format!("system_prompt_for_{}", self.role))
    }

    fn task_prompt_template(&self) -> String {
        self.task_template
            .clone()
            .unwrap_or_else(|| format!("task_prompt_for_{}", self.role))
    }

    fn default_pre_tool_results(&self) -> Map<String, Value> {
        self.defaults.clone()
    }

    fn task_prompt_params(&self, pre_tool_results: &Map<String, Value>) -> Map<String, Value> {
        match &self.params {
            Some(f) => f(pre_tool_results),
            None => pre_tool_results.clone(),
        }
    }

    fn update_state_result(
        &self,
        state: &mut ExecutionState,
        result: Value,
        pre_tool_results: &Map<String, Value>,
    ) {
        match &self.on_result {
            Some(f) => f(state, result, pre_tool_results),
            None => state.set_agent_result(&self.role, result),
        }
    }
}

impl std::fmt::Debug for AgentDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDefinition")
            .field("role", &self.role)
            .field("system_template", &self.system_prompt_template())
            .field("task_template", &self.task_prompt_template())
            .finish()
    }
}

/// Outcome of one Parallel-mode item, by input position
#[derive(Debug, Clone, PartialEq)]
pub struct ItemOutcome {
    pub index: usize,
    pub result: Result<Value, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_defaults() {
        let agent = AgentDefinition::new("outliner");
        assert_eq!(agent.system_prompt_template(), "system_prompt_for_outliner");
        assert_eq!(agent.task_prompt_template(), "task_prompt_for_outliner");

        let mut state = ExecutionState::default();
        agent.update_state_result(&mut state, json!({"slides": 3}), &Map::new());
        assert_eq!(state.agent_result("outliner"), Some(&json!({"slides": 3})));
    }

    #[test]
    fn test_definition_hooks() {
        let agent = AgentDefinition::new("writer")
            .with_templates("sys", "task")
            .with_params(|pre| {
                let mut params = pre.clone();
                params.insert("upper".into(), json!(pre["topic"].as_str().map(str::to_uppercase)));
                params
            })
            .on_result(|state, result, pre| {
                let key = pre["topic"].as_str().unwrap_or("unknown").to_string();
                state.temp_data.insert(key, result);
            });

        assert_eq!(agent.task_prompt_template(), "task");
        let mut pre = Map::new();
        pre.insert("topic".into(), json!("rust"));
        assert_eq!(agent.task_prompt_params(&pre)["upper"], json!("RUST"));

        let mut state = ExecutionState::default();
        agent.update_state_result(&mut state, json!("draft"), &pre);
        assert_eq!(state.get("rust"), Some(&json!("draft")));
        assert!(state.agent_result("writer").is_none());
    }
}
