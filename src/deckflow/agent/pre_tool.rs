// SPDX-License-Identifier: MIT

//! Pre-tools: per-role functions that supply one prompt parameter each

use crate::deckflow::workflow::state::ExecutionState;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Reads the state and produces a parameter value. Must not mutate state.
pub type PreToolFn = Arc<dyn Fn(&ExecutionState) -> Value + Send + Sync>;

#[derive(Clone)]
pub struct PreToolRegistry {
    tools: Arc<RwLock<HashMap<String, Vec<(String, PreToolFn)>>>>,
}

impl PreToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Bind `param` for `role`. Re-binding the same parameter replaces it.
    pub async fn register<F>(&self, role: &str, param: &str, tool: F)
    where
        F: Fn(&ExecutionState) -> Value + Send + Sync + 'static,
    {
        let mut tools = self.tools.write().await;
        let bound = tools.entry(role.to_string()).or_default();
        let tool: PreToolFn = Arc::new(tool);
        match bound.iter_mut().find(|(name, _)| name == param) {
            Some(slot) => {
                log::warn!("Pre-tool '{}' for role '{}' replaced", param, role);
                slot.1 = tool;
            }
            None => bound.push((param.to_string(), tool)),
        }
    }

    /// Run every pre-tool bound to `role`, in registration order
    pub async fn collect(&self, role: &str, state: &ExecutionState) -> Map<String, Value> {
        let bound = {
            let tools = self.tools.read().await;
            tools.get(role).cloned().unwrap_or_default()
        };
        bound
            .into_iter()
            .map(|(param, tool)| {
                let value = tool(state);
                log::debug!("Pre-tool '{}' for '{}' produced {}", param, role, value);
                (param, value)
            })
            .collect()
    }
}

impl Default for PreToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
