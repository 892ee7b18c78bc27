// SPDX-License-Identifier: MIT

//! Graph workflow executor

use super::types::{NodeFn, RouterFn, END};
use crate::deckflow::error::WorkflowError;
use crate::deckflow::workflow::state::ExecutionState;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable, executable form of a built graph. Cheap to clone.
#[derive(Clone)]
pub struct CompiledGraph {
    name: String,
    entry: String,
    nodes: Arc<HashMap<String, NodeFn>>,
    edges: Arc<HashMap<String, String>>,
    routers: Arc<HashMap<String, RouterFn>>,
    max_steps: Option<usize>,
}

impl CompiledGraph {
    pub(super) fn new(
        name: String,
        entry: String,
        nodes: Arc<HashMap<String, NodeFn>>,
        edges: Arc<HashMap<String, String>>,
        routers: Arc<HashMap<String, RouterFn>>,
        max_steps: Option<usize>,
    ) -> Self {
        Self {
            name,
            entry,
            nodes,
            edges,
            routers,
            max_steps,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn max_steps(&self) -> Option<usize> {
        self.max_steps
    }

    /// Apply a step ceiling unless the graph already declares one
    pub fn with_default_max_steps(mut self, limit: Option<usize>) -> Self {
        if self.max_steps.is_none() {
            self.max_steps = limit;
        }
        self
    }

    /// Run the graph from its entry node until a terminal is reached.
    ///
    /// On node failure the returned error carries the state as it was before
    /// the failing node started.
    pub async fn invoke(&self, mut state: ExecutionState) -> Result<ExecutionState, WorkflowError> {
        let token = state.cancel_token();
        let mut current = self.entry.clone();
        let mut steps = 0usize;

        log::info!(
            "Invoking graph '{}' (run {}) at '{}'",
            self.name,
            state.run_id,
            current
        );

        loop {
            if current == END {
                log::info!("Graph '{}' reached end after {} steps", self.name, steps);
                return Ok(state);
            }
            if let Some(limit) = self.max_steps {
                if steps >= limit {
                    log::error!("Graph '{}' exceeded {} steps", self.name, limit);
                    return Err(WorkflowError::StepLimitExceeded { limit });
                }
            }
            if token.is_cancelled() {
                return Err(WorkflowError::Cancelled { node: current });
            }

            let node = match self.nodes.get(&current) {
                Some(node) => node.clone(),
                None => {
                    return Err(WorkflowError::GraphInvalid(format!(
                        "{}: node '{}' vanished",
                        self.name, current
                    )))
                }
            };

            steps += 1;
            log::debug!("Graph '{}' step {}: '{}'", self.name, steps, current);
            let snapshot = state.clone();

            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    log::warn!("Graph '{}' cancelled during '{}'", self.name, current);
                    return Err(WorkflowError::Cancelled { node: current });
                }
                result = node(state) => result,
            };

            state = match outcome {
                Ok(next) => next,
                Err(e) => {
                    log::error!("Node '{}' failed: {}", current, e);
                    return Err(WorkflowError::NodeFailed {
                        node: current,
                        source: Box::new(e),
                        last_state: Box::new(snapshot),
                    });
                }
            };

            current = match (self.routers.get(&current), self.edges.get(&current)) {
                (Some(router), _) => {
                    let target = router(&state);
                    if target != END && !self.nodes.contains_key(&target) {
                        return Err(WorkflowError::UnknownRoute {
                            from: current,
                            target,
                        });
                    }
                    log::debug!("Router on '{}' chose '{}'", current, target);
                    target
                }
                (None, Some(next)) => next.clone(),
                (None, None) => {
                    log::info!(
                        "Graph '{}' finished at terminal node '{}' after {} steps",
                        self.name,
                        current,
                        steps
                    );
                    return Ok(state);
                }
            };
        }
    }
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut nodes: Vec<&String> = self.nodes.keys().collect();
        nodes.sort();
        f.debug_struct("CompiledGraph")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .field("nodes", &nodes)
            .field("max_steps", &self.max_steps)
            .finish()
    }
}
