// SPDX-License-Identifier: MIT

//! Workflow graph engine
//!
//! Nodes are async state transforms; edges are static (`a -> b`) or
//! conditional (a router picks the next node from the state). The engine runs
//! one node at a time and follows the outgoing edge until it reaches [END] or
//! a node with no outgoing edge.

pub mod builder;
pub mod executor;
pub mod types;

pub use builder::GraphBuilder;
pub use executor::CompiledGraph;
pub use types::{node_fn, passthrough, router_fn, NodeFn, RouterFn, END};
