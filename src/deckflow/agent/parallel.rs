// SPDX-License-Identifier: MIT

//! Parallel mode: one Simple-style turn per input item, bounded fan-out
//!
//! Items run concurrently but never touch the state; every outcome is
//! collected by input position and merged once, after the whole batch.

use super::config::{ItemFailurePolicy, ParallelConfig};
use super::executor::AgentExecutor;
use super::{AgentRole, ItemOutcome};
use crate::deckflow::error::AgentError;
use crate::deckflow::workflow::concurrency::fan_out;
use crate::deckflow::workflow::state::ExecutionState;
use serde_json::{json, Map, Value};

pub(crate) async fn run_batch(
    executor: &AgentExecutor,
    agent: &dyn AgentRole,
    config: &ParallelConfig,
    mut state: ExecutionState,
    pre_tool_results: &Map<String, Value>,
) -> Result<ExecutionState, AgentError> {
    let role = agent.role_name();
    let items = match pre_tool_results.get(&config.items_key) {
        Some(Value::Array(items)) => items.clone(),
        _ => {
            return Err(AgentError::MissingBatchInput {
                role: role.to_string(),
                key: config.items_key.clone(),
            })
        }
    };

    let limit = config
        .concurrency_limit
        .unwrap_or(executor.settings().default_concurrency_limit);
    log::info!(
        "Running {} items for '{}' with concurrency {}",
        items.len(),
        role,
        limit
    );

    let outcomes = {
        let state = &state;
        fan_out(items, limit, |index, item| async move {
            let params = item_params(pre_tool_results, &config.items_key, index, item);
            let result = run_item(executor, agent, config, state, &params).await;
            (index, result)
        })
        .await
    };

    if state.is_cancelled() {
        return Err(AgentError::Cancelled {
            role: role.to_string(),
        });
    }

    let outcomes: Vec<ItemOutcome> = outcomes
        .into_iter()
        .map(|(index, result)| ItemOutcome {
            index,
            result: result.map_err(|e| e.to_string()),
        })
        .collect();
    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();

    let merged: Vec<Value> = match config.on_item_failure {
        ItemFailurePolicy::Fail if failed > 0 => {
            log::error!(
                "Agent '{}' batch failed for {} of {} items",
                role,
                failed,
                outcomes.len()
            );
            return Err(AgentError::PartialBatchFailure {
                role: role.to_string(),
                outcomes,
                state: Box::new(state),
            });
        }
        ItemFailurePolicy::Fail => outcomes
            .into_iter()
            .filter_map(|o| o.result.ok())
            .collect(),
        ItemFailurePolicy::Drop => outcomes
            .into_iter()
            .filter_map(|o| match o.result {
                Ok(value) => Some(value),
                Err(message) => {
                    log::warn!("Dropping item {} for '{}': {}", o.index, role, message);
                    None
                }
            })
            .collect(),
        ItemFailurePolicy::Placeholder => outcomes
            .into_iter()
            .map(|o| match o.result {
                Ok(value) => value,
                Err(message) => {
                    log::warn!("Item {} for '{}' failed: {}", o.index, role, message);
                    Value::Null
                }
            })
            .collect(),
    };

    agent.update_state_result(&mut state, Value::Array(merged), pre_tool_results);
    Ok(state)
}

/// Pre-tool results plus the item itself, its fields (when an object) and its index
fn item_params(
    pre_tool_results: &Map<String, Value>,
    items_key: &str,
    index: usize,
    item: Value,
) -> Map<String, Value> {
    let mut params = pre_tool_results.clone();
    if let Value::Object(fields) = &item {
        params.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    params.insert(items_key.to_string(), item);
    params.insert("item_index".to_string(), json!(index));
    params
}

async fn run_item(
    executor: &AgentExecutor,
    agent: &dyn AgentRole,
    config: &ParallelConfig,
    state: &ExecutionState,
    params: &Map<String, Value>,
) -> Result<Value, AgentError> {
    let turn = executor.prepare_turn(agent, &config.common, params)?;
    let attempts = config.item_retries.saturating_add(1);
    let mut attempt = 0;
    loop {
        match executor.invoke_once(&turn, state, None).await {
            Ok(output) => return Ok(output.value),
            Err(err @ AgentError::Cancelled { .. }) => return Err(err),
            Err(err) if attempt + 1 < attempts => {
                log::warn!(
                    "Item {} for '{}' failed (attempt {}/{}): {}",
                    params["item_index"],
                    turn.role,
                    attempt + 1,
                    attempts,
                    err
                );
                config.backoff.wait(attempt).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_params() {
        let mut pre = Map::new();
        pre.insert("deck".into(), json!("intro"));
        pre.insert("items".into(), json!([{"title": "a"}, {"title": "b"}]));

        let params = item_params(&pre, "items", 1, json!({"title": "b"}));
        assert_eq!(params["deck"], json!("intro"));
        assert_eq!(params["title"], json!("b"));
        assert_eq!(params["items"], json!({"title": "b"}));
        assert_eq!(params["item_index"], json!(1));

        let params = item_params(&pre, "items", 0, json!("plain"));
        assert_eq!(params["items"], json!("plain"));
        assert!(params.get("title").is_none());
    }
}
