// SPDX-License-Identifier: MIT

//! Execution state threaded through one workflow run

use crate::adk::model::Content;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How [ExecutionState::update] combines a new value with an existing one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Reducer {
    #[default]
    Overwrite,
    /// Push onto an array (arrays are extended)
    Append,
    /// Shallow-merge object keys
    Merge,
}

/// The single mutable record of a workflow run.
///
/// Nodes take it by value and hand it back; clones share the same
/// cancellation token, so a snapshot still observes run cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Request/config payload supplied by the caller
    pub request: Value,
    /// Ordered conversation history
    pub messages: Vec<Content>,
    /// Parsed results keyed by agent role
    pub agent_results: HashMap<String, Value>,
    /// Scratch storage for inter-node data
    pub temp_data: Map<String, Value>,
    /// Values injected for upcoming agents; override registered pre-tools
    pub pre_tool_results: Map<String, Value>,
    /// Root for artifacts produced during the run
    pub result_path: Option<PathBuf>,
    #[serde(skip)]
    cancel: CancellationToken,
}

impl ExecutionState {
    pub fn new(request: Value) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            request,
            messages: Vec::new(),
            agent_results: HashMap::new(),
            temp_data: Map::new(),
            pre_tool_results: Map::new(),
            result_path: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_result_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.result_path = Some(path.into());
        self
    }

    /// Attach an externally owned cancellation token
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Update a scratch field using the given reducer
    pub fn update(&mut self, key: &str, value: Value, reducer: Reducer) {
        match reducer {
            Reducer::Overwrite => {
                self.temp_data.insert(key.to_string(), value);
            }
            Reducer::Append => {
                let slot = self
                    .temp_data
                    .entry(key.to_string())
                    .or_insert(Value::Array(vec![]));
                if !slot.is_array() {
                    let previous = slot.take();
                    *slot = Value::Array(vec![previous]);
                }
                if let Value::Array(items) = slot {
                    match value {
                        Value::Array(new_items) => items.extend(new_items),
                        other => items.push(other),
                    }
                }
            }
            Reducer::Merge => {
                let slot = self
                    .temp_data
                    .entry(key.to_string())
                    .or_insert(Value::Object(Map::new()));
                match (slot, value) {
                    (Value::Object(current), Value::Object(incoming)) => current.extend(incoming),
                    (slot, other) => *slot = other,
                }
            }
        }
    }

    /// Get a scratch field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.temp_data.get(key)
    }

    /// Resolve a dotted path (e.g. "outline.slides") against scratch data,
    /// falling back to agent results for the first segment
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let head = parts.next()?;
        let mut current = self
            .temp_data
            .get(head)
            .or_else(|| self.agent_results.get(head))?;
        for part in parts {
            current = match current {
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                other => other.get(part)?,
            };
        }
        Some(current)
    }

    pub fn agent_result(&self, role: &str) -> Option<&Value> {
        self.agent_results.get(role)
    }

    pub fn set_agent_result(&mut self, role: &str, value: Value) {
        self.agent_results.insert(role.to_string(), value);
    }

    pub fn push_message(&mut self, content: Content) {
        self.messages.push(content);
    }

    /// Directory for this run's artifacts
    pub fn result_root(&self, output_root: &Path) -> PathBuf {
        match &self.result_path {
            Some(path) => path.clone(),
            None => output_root.join(self.run_id.to_string()),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}
