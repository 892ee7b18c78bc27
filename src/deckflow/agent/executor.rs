// SPDX-License-Identifier: MIT

//! One agent turn: resolve, collect pre-tool results, render, dispatch

use super::config::{CommonConfig, ExecutionConfig, GraphConfig, VlmConfig};
use super::pre_tool::PreToolRegistry;
use super::prompt::PromptLibrary;
use super::react;
use super::registry::AgentRegistry;
use super::{parallel, AgentRole};
use crate::adk::model::{
    Content, GenerationConfig, ImageDetail, ModelCaller, ModelOutput, ModelRequest, Part,
    ToolMode, VisionRequest,
};
use crate::adk::parser::parse_output;
use crate::deckflow::config::Settings;
use crate::deckflow::error::{AgentError, FlowError, ModelError, WorkflowError};
use crate::deckflow::workflow::graph::{node_fn, NodeFn};
use crate::deckflow::workflow::registry::WorkflowRegistry;
use crate::deckflow::workflow::state::ExecutionState;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Runs agent turns against a model caller
pub struct AgentExecutor {
    agents: AgentRegistry,
    prompts: Arc<PromptLibrary>,
    pre_tools: PreToolRegistry,
    caller: Arc<dyn ModelCaller>,
    workflows: WorkflowRegistry,
    settings: Settings,
}

/// A fully rendered turn, ready to send
pub(crate) struct Turn<'a> {
    pub role: &'a str,
    pub common: &'a CommonConfig,
    pub system_prompt: String,
    pub task_prompt: String,
    /// Attached to the user message (understanding)
    pub images: Vec<PathBuf>,
    pub image_detail: ImageDetail,
    /// Set for image-producing calls
    pub vision: Option<VisionRequest>,
}

/// A parsed reply plus the exchange that produced it
pub(crate) struct TurnOutput {
    pub value: Value,
    pub exchange: [Content; 2],
}

impl AgentExecutor {
    pub fn new(caller: Arc<dyn ModelCaller>) -> Self {
        Self {
            agents: AgentRegistry::new(),
            prompts: Arc::new(PromptLibrary::new()),
            pre_tools: PreToolRegistry::new(),
            caller,
            workflows: WorkflowRegistry::new(),
            settings: Settings::default(),
        }
    }

    pub fn with_agents(mut self, agents: AgentRegistry) -> Self {
        self.agents = agents;
        self
    }

    pub fn with_prompts(mut self, prompts: PromptLibrary) -> Self {
        self.prompts = Arc::new(prompts);
        self
    }

    pub fn with_pre_tools(mut self, pre_tools: PreToolRegistry) -> Self {
        self.pre_tools = pre_tools;
        self
    }

    pub fn with_workflows(mut self, workflows: WorkflowRegistry) -> Self {
        self.workflows = workflows;
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn pre_tools(&self) -> &PreToolRegistry {
        &self.pre_tools
    }

    pub fn workflows(&self) -> &WorkflowRegistry {
        &self.workflows
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run one agent turn and return the updated state
    pub async fn execute(
        &self,
        role: &str,
        config: &ExecutionConfig,
        state: ExecutionState,
        extra_params: Map<String, Value>,
    ) -> Result<ExecutionState, AgentError> {
        let agent = self.agents.get(role).await?;
        log::info!("Executing agent '{}' in {} mode", role, config.mode_name());

        let pre_tool_results = self
            .pre_tool_results(agent.as_ref(), &state, extra_params)
            .await;

        match config {
            ExecutionConfig::Simple(c) => {
                let turn = self.prepare_turn(agent.as_ref(), &c.common, &pre_tool_results)?;
                let output = self.invoke_once(&turn, &state, None).await?;
                Ok(commit(agent.as_ref(), state, output, &pre_tool_results, &c.common))
            }
            ExecutionConfig::React(c) => {
                let turn = self.prepare_turn(agent.as_ref(), &c.common, &pre_tool_results)?;
                let output = react::run_with_validation(
                    self,
                    &turn,
                    &state,
                    &c.validators,
                    c.max_retries,
                    c.backoff,
                )
                .await?;
                Ok(commit(agent.as_ref(), state, output, &pre_tool_results, &c.common))
            }
            ExecutionConfig::Graph(c) => self.run_graph(role, c, state).await,
            ExecutionConfig::Vlm(c) => {
                self.run_vlm(agent.as_ref(), c, state, &pre_tool_results)
                    .await
            }
            ExecutionConfig::Parallel(c) => {
                parallel::run_batch(self, agent.as_ref(), c, state, &pre_tool_results).await
            }
        }
    }

    /// Build the named workflow and run it
    pub async fn run_workflow(
        &self,
        name: &str,
        state: ExecutionState,
    ) -> Result<ExecutionState, FlowError> {
        Ok(self.invoke_workflow(name, state).await?)
    }

    /// Wrap an agent turn as a graph node
    pub fn node(self: &Arc<Self>, role: &str, config: ExecutionConfig) -> NodeFn {
        let executor = Arc::clone(self);
        let role = role.to_string();
        let config = Arc::new(config);
        node_fn(move |state| {
            let executor = executor.clone();
            let role = role.clone();
            let config = config.clone();
            async move { Ok(executor.execute(&role, &config, state, Map::new()).await?) }
        })
    }

    /// defaults < registered pre-tools < values injected into the state < extra params
    async fn pre_tool_results(
        &self,
        agent: &dyn AgentRole,
        state: &ExecutionState,
        extra_params: Map<String, Value>,
    ) -> Map<String, Value> {
        let mut results = agent.default_pre_tool_results();
        results.extend(self.pre_tools.collect(agent.role_name(), state).await);
        results.extend(
            state
                .pre_tool_results
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        results.extend(extra_params);
        results
    }

    pub(crate) fn prepare_turn<'a>(
        &self,
        agent: &'a dyn AgentRole,
        common: &'a CommonConfig,
        pre_tool_results: &Map<String, Value>,
    ) -> Result<Turn<'a>, AgentError> {
        let params = agent.task_prompt_params(pre_tool_results);
        let system_prompt = self
            .prompts
            .render(&agent.system_prompt_template(), &params)?;
        let task_prompt = self.prompts.render(&agent.task_prompt_template(), &params)?;
        Ok(Turn {
            role: agent.role_name(),
            common,
            system_prompt,
            task_prompt,
            images: Vec::new(),
            image_detail: ImageDetail::Auto,
            vision: None,
        })
    }

    fn build_request(
        &self,
        turn: &Turn<'_>,
        state: &ExecutionState,
        feedback: Option<&str>,
    ) -> (ModelRequest, Content) {
        let common = turn.common;

        let task = match feedback {
            Some(feedback) => format!("{}\n\n{}", turn.task_prompt, feedback),
            None => turn.task_prompt.clone(),
        };
        let mut parts = vec![Part::Text(task)];
        parts.extend(turn.images.iter().map(|path| Part::Image {
            path: path.clone(),
            detail: turn.image_detail,
        }));
        let user = Content {
            role: "user".to_string(),
            parts,
        };

        let mut messages = vec![Content::system(turn.system_prompt.clone())];
        if !common.ignore_history {
            messages.extend(state.messages.iter().cloned());
        }
        messages.push(user.clone());

        let request = ModelRequest {
            role_name: turn.role.to_string(),
            model: common
                .model_name
                .clone()
                .unwrap_or_else(|| self.settings.default_model.clone()),
            messages,
            generation: GenerationConfig {
                temperature: Some(common.temperature),
                max_output_tokens: Some(common.max_tokens),
                top_p: common.top_p,
            },
            tool_mode: common.tool_mode,
            bind_tools: common.tool_mode != ToolMode::None,
            timeout: Duration::from_secs(
                common
                    .timeout_secs
                    .unwrap_or(self.settings.request_timeout_secs),
            ),
            vision: turn.vision.clone(),
        };
        (request, user)
    }

    /// One call plus parse. `feedback` is appended to the task prompt.
    pub(crate) async fn invoke_once(
        &self,
        turn: &Turn<'_>,
        state: &ExecutionState,
        feedback: Option<&str>,
    ) -> Result<TurnOutput, AgentError> {
        let (request, user) = self.build_request(turn, state, feedback);
        let output = self.call_model(&request, state).await?;

        match (output, &turn.vision) {
            (ModelOutput::Text(raw), None) => {
                log::debug!("Raw reply for '{}': {}", turn.role, raw);
                let value = parse_output(
                    turn.common.parser_type,
                    &turn.common.parser_config,
                    &raw,
                )
                .map_err(|source| AgentError::Parse {
                    role: turn.role.to_string(),
                    source,
                })?;
                Ok(TurnOutput {
                    value,
                    exchange: [user, Content::assistant(raw)],
                })
            }
            (ModelOutput::Asset(path), Some(_)) => {
                let path = path.display().to_string();
                log::info!("Agent '{}' produced asset {}", turn.role, path);
                Ok(TurnOutput {
                    value: json!({ "image_path": path }),
                    exchange: [user, Content::assistant(path)],
                })
            }
            (ModelOutput::Text(_), Some(vision)) => Err(AgentError::UnexpectedOutput {
                role: turn.role.to_string(),
                message: format!("expected an image asset for {:?} mode, got text", vision.mode),
            }),
            (ModelOutput::Asset(path), None) => Err(AgentError::UnexpectedOutput {
                role: turn.role.to_string(),
                message: format!("expected text, got asset {}", path.display()),
            }),
        }
    }

    /// The model call, bounded by its timeout and raced against run cancellation
    async fn call_model(
        &self,
        request: &ModelRequest,
        state: &ExecutionState,
    ) -> Result<ModelOutput, AgentError> {
        let cancel = state.cancel_token();
        let timeout = request.timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::warn!("Model call for '{}' cancelled", request.role_name);
                Err(AgentError::Cancelled { role: request.role_name.clone() })
            }
            result = tokio::time::timeout(timeout, self.caller.call(request)) => match result {
                Ok(output) => Ok(output?),
                Err(_) => Err(ModelError::Timeout { secs: timeout.as_secs() }.into()),
            },
        }
    }

    async fn run_vlm(
        &self,
        agent: &dyn AgentRole,
        config: &VlmConfig,
        state: ExecutionState,
        pre_tool_results: &Map<String, Value>,
    ) -> Result<ExecutionState, AgentError> {
        let role = agent.role_name();
        let mut turn = self.prepare_turn(agent, &config.common, pre_tool_results)?;

        let mut images = config.input_images.clone();
        if let Some(extra) = config
            .additional_params
            .get("input_image")
            .and_then(Value::as_str)
        {
            images.push(PathBuf::from(extra));
        }

        if config.vlm_mode.produces_asset() {
            let output_path = match &config.output_image {
                Some(path) => path.clone(),
                None => {
                    let id = Uuid::new_v4().simple().to_string();
                    state
                        .result_root(&self.settings.output_root)
                        .join(format!("{}_{}.png", role, &id[..8]))
                }
            };
            let mut params = config.additional_params.clone();
            params.remove("input_image");
            turn.vision = Some(VisionRequest {
                mode: config.vlm_mode,
                detail: config.image_detail,
                max_image_size: config.max_image_size,
                output_path,
                input_images: images,
                params,
            });
        } else {
            turn.images = images;
            turn.image_detail = config.image_detail;
        }

        let output = if config.uses_validation() {
            react::run_with_validation(
                self,
                &turn,
                &state,
                &config.validators,
                config.max_retries,
                config.backoff,
            )
            .await?
        } else {
            self.invoke_once(&turn, &state, None).await?
        };
        Ok(commit(agent, state, output, pre_tool_results, &config.common))
    }

    /// Delegate to a sub-workflow. With validation enabled the whole
    /// sub-workflow is re-run from the incoming state until its result passes.
    async fn run_graph(
        &self,
        role: &str,
        config: &GraphConfig,
        state: ExecutionState,
    ) -> Result<ExecutionState, AgentError> {
        if !config.enable_react_validation {
            return self.run_sub_workflow(&config.workflow, state).await;
        }

        let attempts = config.react_max_retries + 1;
        let mut feedback: Option<String> = None;
        let mut diagnostic = String::new();

        for attempt in 0..attempts {
            let mut input = state.clone();
            if let Some(feedback) = &feedback {
                input
                    .temp_data
                    .insert("validation_feedback".to_string(), json!(feedback));
            }

            let mut output = self.run_sub_workflow(&config.workflow, input).await?;
            let result = graph_result(&output, role);
            match config.validators.run(&result, &output) {
                Ok(()) => {
                    output.temp_data.remove("validation_feedback");
                    return Ok(output);
                }
                Err((validator, message)) => {
                    log::warn!(
                        "Sub-workflow '{}' result for '{}' rejected by {} (attempt {}/{}): {}",
                        config.workflow,
                        role,
                        validator,
                        attempt + 1,
                        attempts,
                        message
                    );
                    feedback = Some(react::feedback_prompt(&message));
                    diagnostic = message;
                }
            }
        }

        Err(AgentError::ValidationExhausted {
            role: role.to_string(),
            attempts,
            diagnostic,
        })
    }

    async fn run_sub_workflow(
        &self,
        name: &str,
        state: ExecutionState,
    ) -> Result<ExecutionState, AgentError> {
        self.invoke_workflow(name, state)
            .await
            .map_err(|e| AgentError::SubWorkflow(Box::new(FlowError::Workflow(e))))
    }

    /// Graphs without their own ceiling take `Settings::max_steps`
    async fn invoke_workflow(
        &self,
        name: &str,
        state: ExecutionState,
    ) -> Result<ExecutionState, WorkflowError> {
        let graph = self
            .workflows
            .build(name)
            .await?
            .with_default_max_steps(self.settings.max_steps);
        log::info!("Running workflow '{}'", name);
        graph.invoke(state).await
    }
}

/// Merge a turn into the state through the agent's hook
pub(crate) fn commit(
    agent: &dyn AgentRole,
    mut state: ExecutionState,
    output: TurnOutput,
    pre_tool_results: &Map<String, Value>,
    common: &CommonConfig,
) -> ExecutionState {
    if !common.ignore_history {
        for content in output.exchange {
            state.push_message(content);
        }
    }
    agent.update_state_result(&mut state, output.value, pre_tool_results);
    state
}

/// The value a sub-workflow produced for `role`: its agent result, else the scratch data
fn graph_result(state: &ExecutionState, role: &str) -> Value {
    state
        .agent_result(role)
        .cloned()
        .unwrap_or_else(|| Value::Object(state.temp_data.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::model::VlmMode;
    use crate::deckflow::agent::AgentDefinition;
    use crate::deckflow::workflow::graph::{passthrough, router_fn, GraphBuilder};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCaller {
        requests: Mutex<Vec<ModelRequest>>,
    }

    #[async_trait]
    impl ModelCaller for RecordingCaller {
        async fn call(&self, request: &ModelRequest) -> Result<ModelOutput, ModelError> {
            self.requests.lock().unwrap().push(request.clone());
            match &request.vision {
                Some(vision) => Ok(ModelOutput::Asset(vision.output_path.clone())),
                None => Ok(ModelOutput::Text(r#"{"ok": true}"#.to_string())),
            }
        }
    }

    async fn executor(caller: Arc<RecordingCaller>) -> AgentExecutor {
        let executor = AgentExecutor::new(caller).with_prompts(
            PromptLibrary::new()
                .with("system_prompt_for_painter", "You paint.")
                .with("task_prompt_for_painter", "Paint {subject}."),
        );
        executor
            .agents()
            .register_definition(AgentDefinition::new("painter"))
            .await
            .unwrap();
        executor
    }

    fn params(subject: &str) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("subject".into(), json!(subject));
        params
    }

    #[tokio::test]
    async fn test_request_uses_settings_fallbacks() {
        let caller = Arc::new(RecordingCaller::default());
        let executor = executor(caller.clone()).await.with_settings(Settings {
            default_model: "house-model".into(),
            request_timeout_secs: 30,
            ..Settings::default()
        });

        executor
            .execute(
                "painter",
                &ExecutionConfig::simple(),
                ExecutionState::default(),
                params("a fox"),
            )
            .await
            .unwrap();

        let requests = caller.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.model, "house-model");
        assert_eq!(request.timeout, Duration::from_secs(30));
        assert!(request.bind_tools);
        assert_eq!(request.messages[0].text_content(), "You paint.");
        assert_eq!(request.messages[1].text_content(), "Paint a fox.");
    }

    #[tokio::test]
    async fn test_sampling_settings_reach_request() {
        let caller = Arc::new(RecordingCaller::default());
        let executor = executor(caller.clone()).await;

        executor
            .execute(
                "painter",
                &ExecutionConfig::simple().with_temperature(0.4).with_top_p(0.8),
                ExecutionState::default(),
                params("a heron"),
            )
            .await
            .unwrap();

        let requests = caller.requests.lock().unwrap();
        assert_eq!(requests[0].generation.temperature, Some(0.4));
        assert_eq!(requests[0].generation.top_p, Some(0.8));
        assert_eq!(requests[0].generation.max_output_tokens, Some(16384));
    }

    #[tokio::test]
    async fn test_vlm_understanding_attaches_images() {
        let caller = Arc::new(RecordingCaller::default());
        let executor = executor(caller.clone()).await;
        let mut config = ExecutionConfig::vlm(VlmMode::Understanding)
            .with_images(["slide1.png"])
            .with_image_detail(ImageDetail::Low);
        if let ExecutionConfig::Vlm(c) = &mut config {
            c.additional_params
                .insert("input_image".into(), json!("extra.png"));
        }

        let state = executor
            .execute("painter", &config, ExecutionState::default(), params("it"))
            .await
            .unwrap();
        assert_eq!(state.agent_result("painter"), Some(&json!({"ok": true})));

        let requests = caller.requests.lock().unwrap();
        let user = &requests[0].messages[1];
        let images: Vec<&Part> = user
            .parts
            .iter()
            .filter(|p| matches!(p, Part::Image { .. }))
            .collect();
        assert_eq!(
            images,
            vec![
                &Part::Image {
                    path: PathBuf::from("slide1.png"),
                    detail: ImageDetail::Low
                },
                &Part::Image {
                    path: PathBuf::from("extra.png"),
                    detail: ImageDetail::Low
                },
            ]
        );
        assert!(requests[0].vision.is_none());
    }

    #[tokio::test]
    async fn test_vlm_generation_derives_output_path() {
        let caller = Arc::new(RecordingCaller::default());
        let executor = executor(caller.clone()).await.with_settings(Settings {
            output_root: PathBuf::from("/tmp/decks"),
            ..Settings::default()
        });
        let state = ExecutionState::default();
        let run_root = PathBuf::from("/tmp/decks").join(state.run_id.to_string());

        let state = executor
            .execute(
                "painter",
                &ExecutionConfig::vlm(VlmMode::Generation),
                state,
                params("a lighthouse"),
            )
            .await
            .unwrap();

        let path = state.agent_result("painter").unwrap()["image_path"]
            .as_str()
            .unwrap()
            .to_string();
        let path = PathBuf::from(path);
        assert_eq!(path.parent(), Some(run_root.as_path()));
        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with("painter_"));
        assert!(file_name.ends_with(".png"));
    }

    #[tokio::test]
    async fn test_text_reply_in_generation_mode_is_unexpected() {
        struct TextOnly;

        #[async_trait]
        impl ModelCaller for TextOnly {
            async fn call(&self, _: &ModelRequest) -> Result<ModelOutput, ModelError> {
                Ok(ModelOutput::Text("I cannot draw".into()))
            }
        }

        let executor = AgentExecutor::new(Arc::new(TextOnly)).with_prompts(
            PromptLibrary::new()
                .with("system_prompt_for_painter", "s")
                .with("task_prompt_for_painter", "t"),
        );
        executor
            .agents()
            .register_definition(AgentDefinition::new("painter"))
            .await
            .unwrap();

        let err = executor
            .execute(
                "painter",
                &ExecutionConfig::vlm(VlmMode::Generation).with_output_image("/tmp/out.png"),
                ExecutionState::default(),
                Map::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnexpectedOutput { .. }));
    }

    #[tokio::test]
    async fn test_missing_prompt_template() {
        let caller = Arc::new(RecordingCaller::default());
        let executor = AgentExecutor::new(caller.clone());
        executor
            .agents()
            .register_definition(AgentDefinition::new("ghost"))
            .await
            .unwrap();

        let err = executor
            .execute(
                "ghost",
                &ExecutionConfig::simple(),
                ExecutionState::default(),
                Map::new(),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, AgentError::PromptRender { ref template, .. } if template == "system_prompt_for_ghost")
        );
        assert!(caller.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settings_step_limit_in_either_builder_order() {
        let spinning = || async {
            let workflows = WorkflowRegistry::new();
            workflows
                .register("spin", || {
                    GraphBuilder::new("spin")
                        .add_node("again", passthrough())
                        .add_conditional_edge("again", router_fn(|_| "again".to_string()))
                        .set_entry_point("again")
                        .build()
                })
                .await
                .unwrap();
            workflows
        };
        let settings = Settings {
            max_steps: Some(10),
            ..Settings::default()
        };
        let caller = Arc::new(RecordingCaller::default());

        let settings_first = AgentExecutor::new(caller.clone())
            .with_settings(settings.clone())
            .with_workflows(spinning().await);
        let workflows_first = AgentExecutor::new(caller)
            .with_workflows(spinning().await)
            .with_settings(settings);

        for executor in [settings_first, workflows_first] {
            let err = executor
                .run_workflow("spin", ExecutionState::default())
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                FlowError::Workflow(WorkflowError::StepLimitExceeded { limit: 10 })
            ));
        }
    }
}
