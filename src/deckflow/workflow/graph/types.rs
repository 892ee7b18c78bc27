// SPDX-License-Identifier: MIT

//! Graph node and router function types

use crate::deckflow::error::FlowError;
use crate::deckflow::workflow::state::ExecutionState;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Reserved terminal sentinel: an edge or router result that ends the run
pub const END: &str = "__end__";

/// A node: takes the state by value and hands back the updated state
pub type NodeFn =
    Arc<dyn Fn(ExecutionState) -> BoxFuture<'static, Result<ExecutionState, FlowError>> + Send + Sync>;

/// A router: picks the next node name from the post-node state
pub type RouterFn = Arc<dyn Fn(&ExecutionState) -> String + Send + Sync>;

/// Wrap an async function as a [NodeFn]
pub fn node_fn<F, Fut>(f: F) -> NodeFn
where
    F: Fn(ExecutionState) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ExecutionState, FlowError>> + Send + 'static,
{
    Arc::new(move |state| Box::pin(f(state)))
}

/// Wrap a plain function as a [RouterFn]
pub fn router_fn<F>(f: F) -> RouterFn
where
    F: Fn(&ExecutionState) -> String + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A node that returns the state unchanged (join points, explicit end nodes)
pub fn passthrough() -> NodeFn {
    node_fn(|state| async move { Ok(state) })
}
