// SPDX-License-Identifier: MIT

//! Named workflow factories, looked up at run time

use super::graph::CompiledGraph;
use super::state::ExecutionState;
use crate::deckflow::error::WorkflowError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Builds a fresh graph on every lookup
pub type WorkflowFactory = Arc<dyn Fn() -> Result<CompiledGraph, WorkflowError> + Send + Sync>;

#[derive(Clone)]
pub struct WorkflowRegistry {
    factories: Arc<RwLock<HashMap<String, WorkflowFactory>>>,
    default_max_steps: Option<usize>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self {
            factories: Arc::new(RwLock::new(HashMap::new())),
            default_max_steps: None,
        }
    }

    /// Step ceiling applied to graphs that do not declare their own
    pub fn with_default_max_steps(mut self, limit: Option<usize>) -> Self {
        self.default_max_steps = limit;
        self
    }

    pub async fn register<F>(&self, name: &str, factory: F) -> Result<(), WorkflowError>
    where
        F: Fn() -> Result<CompiledGraph, WorkflowError> + Send + Sync + 'static,
    {
        let mut factories = self.factories.write().await;
        if factories.contains_key(name) {
            return Err(WorkflowError::DuplicateWorkflow(name.to_string()));
        }
        factories.insert(name.to_string(), Arc::new(factory));
        log::debug!("Registered workflow '{}'", name);
        Ok(())
    }

    pub async fn build(&self, name: &str) -> Result<CompiledGraph, WorkflowError> {
        let factory = {
            let factories = self.factories.read().await;
            factories
                .get(name)
                .cloned()
                .ok_or_else(|| WorkflowError::UnknownWorkflow(name.to_string()))?
        };
        Ok(factory()?.with_default_max_steps(self.default_max_steps))
    }

    /// Build the named workflow and invoke it
    pub async fn run(
        &self,
        name: &str,
        state: ExecutionState,
    ) -> Result<ExecutionState, WorkflowError> {
        let graph = self.build(name).await?;
        log::info!("Running workflow '{}'", name);
        graph.invoke(state).await
    }

    /// Registered names, sorted
    pub async fn names(&self) -> Vec<String> {
        let factories = self.factories.read().await;
        let mut names: Vec<String> = factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deckflow::workflow::graph::{node_fn, router_fn, GraphBuilder};
    use serde_json::json;

    fn tagging_graph() -> Result<CompiledGraph, WorkflowError> {
        GraphBuilder::new("tag")
            .add_node(
                "tag",
                node_fn(|mut state: ExecutionState| async move {
                    state.set_agent_result("tagger", json!("tagged"));
                    Ok(state)
                }),
            )
            .set_entry_point("tag")
            .build()
    }

    #[tokio::test]
    async fn test_register_and_run() {
        let registry = WorkflowRegistry::new();
        registry.register("tag", tagging_graph).await.unwrap();

        let state = registry
            .run("tag", ExecutionState::default())
            .await
            .unwrap();
        assert_eq!(state.agent_result("tagger"), Some(&json!("tagged")));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = WorkflowRegistry::new();
        registry.register("tag", tagging_graph).await.unwrap();
        let err = registry.register("tag", tagging_graph).await.unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateWorkflow(ref n) if n == "tag"));
    }

    #[tokio::test]
    async fn test_unknown_workflow() {
        let registry = WorkflowRegistry::new();
        let err = registry
            .run("missing", ExecutionState::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownWorkflow(_)));
    }

    #[tokio::test]
    async fn test_default_step_limit_applied() {
        let registry = WorkflowRegistry::new().with_default_max_steps(Some(3));
        registry
            .register("spin", || {
                GraphBuilder::new("spin")
                    .add_node("a", crate::deckflow::workflow::graph::passthrough())
                    .add_conditional_edge("a", router_fn(|_| "a".to_string()))
                    .set_entry_point("a")
                    .build()
            })
            .await
            .unwrap();

        let err = registry
            .run("spin", ExecutionState::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::StepLimitExceeded { limit: 3 }));
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let registry = WorkflowRegistry::new();
        let cloned = registry.clone();
        cloned.register("tag", tagging_graph).await.unwrap();
        assert_eq!(registry.names().await, vec!["tag".to_string()]);
    }
}
