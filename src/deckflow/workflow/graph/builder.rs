// SPDX-License-Identifier: MIT

//! Fluent graph builder and build-time validation

use super::executor::CompiledGraph;
use super::types::{NodeFn, RouterFn, END};
use crate::deckflow::error::WorkflowError;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

struct Router {
    func: RouterFn,
    /// Declared targets, used only for validation
    candidates: Option<Vec<String>>,
}

/// Collects nodes and edges, then compiles them with [GraphBuilder::build]
pub struct GraphBuilder {
    name: String,
    entry: Option<String>,
    nodes: HashMap<String, NodeFn>,
    duplicates: Vec<String>,
    edges: Vec<(String, String)>,
    routers: HashMap<String, Router>,
    max_steps: Option<usize>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: None,
            nodes: HashMap::new(),
            duplicates: Vec::new(),
            edges: Vec::new(),
            routers: HashMap::new(),
            max_steps: None,
        }
    }

    pub fn set_entry_point(mut self, node: impl Into<String>) -> Self {
        self.entry = Some(node.into());
        self
    }

    pub fn add_node(mut self, name: impl Into<String>, node: NodeFn) -> Self {
        let name = name.into();
        if self.nodes.insert(name.clone(), node).is_some() {
            self.duplicates.push(name);
        }
        self
    }

    pub fn add_nodes<I, S>(self, nodes: I) -> Self
    where
        I: IntoIterator<Item = (S, NodeFn)>,
        S: Into<String>,
    {
        nodes
            .into_iter()
            .fold(self, |builder, (name, node)| builder.add_node(name, node))
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    pub fn add_edges<I, A, B>(self, edges: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        edges
            .into_iter()
            .fold(self, |builder, (from, to)| builder.add_edge(from, to))
    }

    /// Attach a router to `from`. A second router on the same node replaces the first.
    pub fn add_conditional_edge(self, from: impl Into<String>, router: RouterFn) -> Self {
        self.insert_router(from.into(), router, None)
    }

    /// Attach a router and declare every node it may return
    pub fn add_conditional_edges<I, S>(
        self,
        from: impl Into<String>,
        router: RouterFn,
        candidates: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let candidates = candidates.into_iter().map(Into::into).collect();
        self.insert_router(from.into(), router, Some(candidates))
    }

    fn insert_router(
        mut self,
        from: String,
        func: RouterFn,
        candidates: Option<Vec<String>>,
    ) -> Self {
        if self
            .routers
            .insert(from.clone(), Router { func, candidates })
            .is_some()
        {
            log::warn!(
                "Graph '{}': router on '{}' replaced by a later one",
                self.name,
                from
            );
        }
        self
    }

    /// Fail with `StepLimitExceeded` once this many nodes have run
    pub fn max_steps(mut self, limit: usize) -> Self {
        self.max_steps = Some(limit);
        self
    }

    pub fn build(self) -> Result<CompiledGraph, WorkflowError> {
        let invalid = |msg: String| WorkflowError::GraphInvalid(format!("{}: {}", self.name, msg));

        let entry = self
            .entry
            .clone()
            .ok_or_else(|| invalid("no entry point set".into()))?;
        if !self.nodes.contains_key(&entry) {
            return Err(invalid(format!("entry point '{}' is not a node", entry)));
        }
        if self.nodes.contains_key(END) {
            return Err(invalid(format!("'{}' is reserved for the terminal sentinel", END)));
        }
        if let Some(dup) = self.duplicates.first() {
            return Err(invalid(format!("node '{}' registered twice", dup)));
        }

        let is_target = |name: &str| name == END || self.nodes.contains_key(name);

        let mut static_edges: HashMap<String, String> = HashMap::new();
        for (from, to) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(invalid(format!("edge source '{}' is not a node", from)));
            }
            if !is_target(to) {
                return Err(invalid(format!("edge target '{}' is not a node", to)));
            }
            if let Some(existing) = static_edges.insert(from.clone(), to.clone()) {
                if existing != *to {
                    return Err(invalid(format!(
                        "node '{}' has more than one static edge ('{}', '{}')",
                        from, existing, to
                    )));
                }
            }
        }

        for (from, router) in &self.routers {
            if !self.nodes.contains_key(from) {
                return Err(invalid(format!("router source '{}' is not a node", from)));
            }
            for candidate in router.candidates.iter().flatten() {
                if !is_target(candidate) {
                    return Err(invalid(format!(
                        "router on '{}' declares unknown target '{}'",
                        from, candidate
                    )));
                }
            }
            if static_edges.contains_key(from) {
                log::warn!(
                    "Graph '{}': '{}' has both a router and a static edge; the router wins",
                    self.name,
                    from
                );
            }
        }

        let (reaches_terminal, visited) = self.explore(&entry, &static_edges);
        if !reaches_terminal {
            return Err(invalid(format!(
                "no terminal node reachable from entry '{}'",
                entry
            )));
        }
        for name in self.nodes.keys().filter(|n| !visited.contains(*n)) {
            log::warn!("Graph '{}': node '{}' is unreachable", self.name, name);
        }

        let routers = self
            .routers
            .into_iter()
            .map(|(from, router)| (from, router.func))
            .collect();

        log::info!(
            "Built graph '{}' with {} nodes, entry '{}'",
            self.name,
            self.nodes.len(),
            entry
        );

        Ok(CompiledGraph::new(
            self.name,
            entry,
            Arc::new(self.nodes),
            Arc::new(static_edges),
            Arc::new(routers),
            self.max_steps,
        ))
    }

    /// Breadth-first walk over the effective successors of each node.
    /// Returns whether a terminal is reachable and the set of visited nodes.
    fn explore(
        &self,
        entry: &str,
        static_edges: &HashMap<String, String>,
    ) -> (bool, HashSet<String>) {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([entry.to_string()]);
        let mut reaches_terminal = false;

        while let Some(node) = queue.pop_front() {
            if node == END {
                reaches_terminal = true;
                continue;
            }
            if !visited.insert(node.clone()) {
                continue;
            }

            let successors: Vec<String> = match (self.routers.get(&node), static_edges.get(&node)) {
                (Some(router), _) => match &router.candidates {
                    Some(candidates) => candidates.clone(),
                    None => vec![END.to_string()],
                },
                (None, Some(next)) => vec![next.clone()],
                (None, None) => {
                    reaches_terminal = true;
                    vec![]
                }
            };
            queue.extend(successors);
        }

        (reaches_terminal, visited)
    }
}
