// SPDX-License-Identifier: MIT

use super::{AgentDefinition, AgentRole};
use crate::deckflow::error::AgentError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Constructs the agent for a role
pub type AgentFactory = Arc<dyn Fn() -> Arc<dyn AgentRole> + Send + Sync>;

/// Role name to agent factory. Cloned handles share the same entries.
#[derive(Clone)]
pub struct AgentRegistry {
    agents: Arc<RwLock<HashMap<String, AgentFactory>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register<F>(&self, role: &str, factory: F) -> Result<(), AgentError>
    where
        F: Fn() -> Arc<dyn AgentRole> + Send + Sync + 'static,
    {
        let mut agents = self.agents.write().await;
        if agents.contains_key(role) {
            return Err(AgentError::DuplicateAgent(role.to_string()));
        }
        agents.insert(role.to_string(), Arc::new(factory));
        log::debug!("Registered agent '{}'", role);
        Ok(())
    }

    /// Register a definition under its own role name
    pub async fn register_definition(&self, definition: AgentDefinition) -> Result<(), AgentError> {
        let role = definition.role_name().to_string();
        let definition: Arc<dyn AgentRole> = Arc::new(definition);
        self.register(&role, move || definition.clone()).await
    }

    pub async fn get(&self, role: &str) -> Result<Arc<dyn AgentRole>, AgentError> {
        let agents = self.agents.read().await;
        agents
            .get(role)
            .map(|factory| factory())
            .ok_or_else(|| AgentError::UnknownAgent(role.to_string()))
    }

    pub async fn contains(&self, role: &str) -> bool {
        self.agents.read().await.contains_key(role)
    }

    pub async fn names(&self) -> Vec<String> {
        let agents = self.agents.read().await;
        let mut names: Vec<String> = agents.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
