//! Dependency resolution for the task store.
//!
//! [`DependencyGraph`] mirrors declared task dependencies as a petgraph
//! graph so that cycles can be rejected when a dependency is added.
//! [`next_pending`] is the pure selection function behind
//! `TaskStore::get_next_pending_task`.

use crate::core::task::{TaskId, TaskNode, TaskStatus};
use crate::error::{Error, Result};
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use std::cmp::Reverse;
use std::collections::HashMap;

/// Graph of "must complete before" edges between tasks.
///
/// An edge `a -> b` means `b` depends on `a`. Nodes are removed when a task
/// is purged, so a stable graph keeps the remaining indices valid.
pub struct DependencyGraph {
    graph: StableDiGraph<TaskId, ()>,
    index: HashMap<TaskId, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Register a task. Registering the same id twice returns the existing node.
    pub fn add_task(&mut self, id: TaskId) -> NodeIndex {
        if let Some(&index) = self.index.get(&id) {
            return index;
        }
        let index = self.graph.add_node(id);
        self.index.insert(id, index);
        index
    }

    pub fn remove_task(&mut self, id: &TaskId) {
        if let Some(index) = self.index.remove(id) {
            self.graph.remove_node(index);
        }
    }

    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    /// Record that `task` depends on `depends_on`.
    ///
    /// # Errors
    /// Returns a validation error if either task is unknown or the edge
    /// would close a cycle. The graph is left unchanged on error.
    pub fn add_dependency(&mut self, task: &TaskId, depends_on: &TaskId) -> Result<()> {
        let to = *self
            .index
            .get(task)
            .ok_or_else(|| Error::TaskNotFound(task.to_string()))?;
        let from = *self
            .index
            .get(depends_on)
            .ok_or_else(|| Error::TaskNotFound(depends_on.to_string()))?;

        if self.graph.find_edge(from, to).is_some() {
            return Ok(());
        }

        let edge = self.graph.add_edge(from, to, ());
        if is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            return Err(Error::Validation(format!(
                "Dependency of {} on {} would create a cycle",
                task.short(),
                depends_on.short()
            )));
        }
        Ok(())
    }

    pub fn has_dependency(&self, task: &TaskId, depends_on: &TaskId) -> bool {
        match (self.index.get(depends_on), self.index.get(task)) {
            (Some(&from), Some(&to)) => self.graph.find_edge(from, to).is_some(),
            _ => false,
        }
    }

    /// Tasks that directly depend on `id`.
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        match self.index.get(id) {
            Some(&index) => self
                .graph
                .neighbors_directed(index, petgraph::Direction::Outgoing)
                .filter_map(|n| self.graph.node_weight(n).copied())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Task ids ordered so every task comes after its dependencies.
    pub fn topological_order(&self) -> Result<Vec<TaskId>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let at = self
                .graph
                .node_weight(cycle.node_id())
                .map(|id| id.short())
                .unwrap_or_else(|| "unknown".to_string());
            Error::Validation(format!("Cycle detected at task: {}", at))
        })?;
        Ok(sorted
            .into_iter()
            .filter_map(|index| self.graph.node_weight(index).copied())
            .collect())
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}

/// Whether every dependency of `node` resolves to a Completed task.
///
/// `status_of` looks a task up anywhere it may live (active set or
/// history). Unknown ids count as unmet.
pub fn dependencies_met<F>(node: &TaskNode, status_of: F) -> bool
where
    F: Fn(&TaskId) -> Option<TaskStatus>,
{
    node.dependencies
        .iter()
        .all(|dep| status_of(dep) == Some(TaskStatus::Completed))
}

/// Pick the next task to run.
///
/// Candidates are `(insertion sequence, node)` pairs. Only Pending nodes
/// with all dependencies met qualify; among those the highest priority
/// wins, then the earliest `created_at`, then the lowest sequence number.
pub fn next_pending<'a, I, F>(candidates: I, status_of: F) -> Option<&'a TaskNode>
where
    I: IntoIterator<Item = (u64, &'a TaskNode)>,
    F: Fn(&TaskId) -> Option<TaskStatus>,
{
    candidates
        .into_iter()
        .filter(|(_, node)| node.status == TaskStatus::Pending)
        .filter(|(_, node)| dependencies_met(node, &status_of))
        .min_by_key(|(seq, node)| (Reverse(node.priority), node.created_at, *seq))
        .map(|(_, node)| node)
}
