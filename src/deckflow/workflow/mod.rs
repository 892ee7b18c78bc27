// SPDX-License-Identifier: MIT

pub mod concurrency;
pub mod graph;
pub mod loader;
pub mod registry;
pub mod state;

pub use concurrency::{bounded_join, fan_out};
pub use graph::{CompiledGraph, GraphBuilder, END};
pub use loader::WorkflowLoader;
pub use registry::WorkflowRegistry;
pub use state::{ExecutionState, Reducer};
