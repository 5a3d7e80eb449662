//! Hierarchical task store.
//!
//! The [`TaskStore`] owns every [`TaskNode`]: non-terminal nodes live in the
//! active set, terminal ones move into a bounded history. All reads return
//! cloned snapshots. The store is shared across tasks as
//! [`SharedTaskStore`], so every mutation happens under one write guard.

use crate::config::StoreConfig;
use crate::core::resolver::{self, DependencyGraph};
use crate::core::stats::TaskStatistics;
use crate::core::task::{
    Payload, TaskContext, TaskError, TaskId, TaskNode, TaskPriority, TaskStatus, TaskType,
};
use crate::error::{Error, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Number of errors and history entries in [`CurrentTaskContext`].
const RECENT_LIMIT: usize = 5;

/// Task store shared between the orchestrator, executors and callers.
pub type SharedTaskStore = Arc<RwLock<TaskStore>>;

/// Change notifications emitted by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Created {
        task_id: TaskId,
    },
    Decomposed {
        parent_id: TaskId,
        subtasks: Vec<TaskId>,
    },
    StatusChanged {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    /// A parent was completed because all of its subtasks completed.
    AutoCompleted {
        task_id: TaskId,
    },
    Purged {
        count: usize,
    },
}

/// Conjunctive search filter. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    /// Case-insensitive substring of title or description.
    pub text: Option<String>,
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
}

impl TaskQuery {
    pub fn text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    fn matches(&self, node: &TaskNode) -> bool {
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            if !node.title.to_lowercase().contains(&needle)
                && !node.description.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        self.task_type.map_or(true, |t| node.task_type == t)
            && self.status.map_or(true, |s| node.status == s)
            && self.priority.map_or(true, |p| node.priority == p)
    }
}

/// Snapshot of what the store is working on right now.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentTaskContext {
    pub current: Option<TaskNode>,
    pub subtasks: Vec<TaskNode>,
    pub active_count: usize,
    pub pending_count: usize,
    /// Most recent errors across all tasks, newest first.
    pub recent_errors: Vec<TaskError>,
    /// Most recently finished tasks, newest first.
    pub recent_history: Vec<TaskNode>,
}

/// Owner of all task nodes.
pub struct TaskStore {
    active: HashMap<TaskId, TaskNode>,
    /// Insertion sequence of every known node, the final ordering tiebreak.
    sequence: HashMap<TaskId, u64>,
    next_seq: u64,
    history: VecDeque<TaskNode>,
    history_limit: usize,
    current: Option<TaskId>,
    graph: DependencyGraph,
    events: Option<mpsc::UnboundedSender<TaskEvent>>,
}

impl TaskStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self::with_history_limit(config.history_limit)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            active: HashMap::new(),
            sequence: HashMap::new(),
            next_seq: 0,
            history: VecDeque::new(),
            history_limit: history_limit.max(1),
            current: None,
            graph: DependencyGraph::new(),
            events: None,
        }
    }

    /// Attach a channel that receives a [`TaskEvent`] for every change.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<TaskEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn into_shared(self) -> SharedTaskStore {
        Arc::new(RwLock::new(self))
    }

    fn emit(&self, event: TaskEvent) {
        if let Some(tx) = &self.events {
            // Receiver may have been dropped; events are best-effort.
            let _ = tx.send(event);
        }
    }

    // ========== Mutation ==========

    /// Create a Pending task and make it the current task.
    pub fn create_task(
        &mut self,
        title: &str,
        description: &str,
        task_type: TaskType,
        priority: TaskPriority,
        context: TaskContext,
        inputs: Payload,
    ) -> TaskNode {
        let node = TaskNode::new(title, description, task_type, priority)
            .with_context(context)
            .with_inputs(inputs);
        self.insert_task(node)
    }

    /// Register a pre-built node as a new Pending task and make it current.
    ///
    /// Declared dependencies on known tasks are mirrored into the dependency
    /// graph; one that would close a cycle is dropped with a warning.
    pub fn insert_task(&mut self, mut node: TaskNode) -> TaskNode {
        node.status = TaskStatus::Pending;
        node.started_at = None;
        node.completed_at = None;
        let id = node.id;

        self.register(&mut node);
        self.current = Some(id);
        info!(task_id = %id.short(), title = %node.title, "Task created");
        self.emit(TaskEvent::Created { task_id: id });
        let snapshot = node.clone();
        self.active.insert(id, node);
        snapshot
    }

    fn register(&mut self, node: &mut TaskNode) {
        self.sequence.insert(node.id, self.next_seq);
        self.next_seq += 1;
        self.graph.add_task(node.id);

        let mut rejected = Vec::new();
        for dep in &node.dependencies {
            if !self.graph.contains_task(dep) {
                continue;
            }
            if let Err(e) = self.graph.add_dependency(&node.id, dep) {
                warn!(task_id = %node.id.short(), error = %e, "Dropping dependency");
                rejected.push(*dep);
            }
        }
        for dep in rejected {
            node.dependencies.remove(&dep);
        }
    }

    /// Attach `subtasks` as children of an active task.
    ///
    /// Returns `None` when `task_id` is not in the active set.
    pub fn decompose_task(
        &mut self,
        task_id: &TaskId,
        subtasks: Vec<TaskNode>,
    ) -> Option<TaskNode> {
        if !self.active.contains_key(task_id) {
            return None;
        }

        // siblings may depend on each other in any order
        for child in &subtasks {
            self.graph.add_task(child.id);
        }
        let mut child_ids = Vec::with_capacity(subtasks.len());
        for mut child in subtasks {
            child.parent_id = Some(*task_id);
            child.status = TaskStatus::Pending;
            self.register(&mut child);
            child_ids.push(child.id);
            self.active.insert(child.id, child);
        }

        let parent = self.active.get_mut(task_id)?;
        parent.subtasks.extend(child_ids.iter().copied());
        parent.task_type = TaskType::GoalDecomposition;
        parent.metadata.subtask_count = Some(parent.subtasks.len());
        let snapshot = parent.clone();

        debug!(
            task_id = %task_id.short(),
            subtasks = child_ids.len(),
            "Task decomposed"
        );
        self.emit(TaskEvent::Decomposed {
            parent_id: *task_id,
            subtasks: child_ids,
        });
        Some(snapshot)
    }

    /// Change a task's status, merging outputs and recording an error.
    ///
    /// Returns `None` for unknown ids. Terminal tasks are left untouched and
    /// their unchanged snapshot is returned. Reaching a terminal status moves
    /// the task into history and completes ancestors whose subtasks are all
    /// Completed.
    pub fn update_task_status(
        &mut self,
        task_id: &TaskId,
        status: TaskStatus,
        outputs: Option<Payload>,
        error: Option<TaskError>,
    ) -> Option<TaskNode> {
        let Some(node) = self.active.get_mut(task_id) else {
            return self.find_in_history(task_id).cloned();
        };
        if node.is_terminal() {
            return Some(node.clone());
        }

        if let Some(outputs) = outputs {
            node.outputs.extend(outputs);
        }
        if let Some(error) = error {
            node.errors.push(error);
        }
        let from = node.status;
        node.transition(status);
        let snapshot = node.clone();
        let parent_id = node.parent_id;

        debug!(task_id = %task_id.short(), %from, to = %status, "Task status changed");
        self.emit(TaskEvent::StatusChanged {
            task_id: *task_id,
            from,
            to: status,
        });

        if status.is_terminal() {
            self.archive(task_id);
            self.propagate_completion(parent_id);
        }
        Some(snapshot)
    }

    /// Record a tool run: the tool joins `tools_used`, its output is stored
    /// in `outputs` under the tool name.
    pub fn add_tool_execution(
        &mut self,
        task_id: &TaskId,
        tool: &str,
        output: serde_json::Value,
    ) -> Option<TaskNode> {
        let Some(node) = self.active.get_mut(task_id) else {
            return self.find_in_history(task_id).cloned();
        };
        if node.is_terminal() {
            return Some(node.clone());
        }
        node.tools_used.push(tool.to_string());
        node.outputs.insert(tool.to_string(), output);
        debug!(task_id = %task_id.short(), tool, "Tool execution recorded");
        Some(node.clone())
    }

    /// Declare that `task_id` may not start before `depends_on` completes.
    ///
    /// # Errors
    /// `TaskNotFound` if either id is unknown, `Validation` if `task_id` is
    /// terminal or the dependency would create a cycle.
    pub fn add_dependency(&mut self, task_id: &TaskId, depends_on: &TaskId) -> Result<()> {
        if self.status_of(depends_on).is_none() {
            return Err(Error::TaskNotFound(depends_on.to_string()));
        }
        let node = match self.active.get(task_id) {
            Some(node) => node,
            None if self.find_in_history(task_id).is_some() => {
                return Err(Error::Validation(format!(
                    "Task {} is terminal",
                    task_id.short()
                )))
            }
            None => return Err(Error::TaskNotFound(task_id.to_string())),
        };
        if node.dependencies.contains(depends_on) {
            return Ok(());
        }

        self.graph.add_dependency(task_id, depends_on)?;
        if let Some(node) = self.active.get_mut(task_id) {
            node.dependencies.insert(*depends_on);
        }
        debug!(
            task_id = %task_id.short(),
            depends_on = %depends_on.short(),
            "Dependency added"
        );
        Ok(())
    }

    /// Move a task from the active set into history, evicting the oldest
    /// entries beyond the history limit.
    fn archive(&mut self, task_id: &TaskId) {
        let Some(node) = self.active.remove(task_id) else {
            return;
        };
        self.history.push_back(node);
        while self.history.len() > self.history_limit {
            if let Some(evicted) = self.history.pop_front() {
                self.forget(&evicted.id);
            }
        }
    }

    fn forget(&mut self, task_id: &TaskId) {
        self.sequence.remove(task_id);
        self.graph.remove_task(task_id);
    }

    /// Complete each ancestor whose subtasks are now all Completed,
    /// walking upward until one is not.
    fn propagate_completion(&mut self, mut parent_id: Option<TaskId>) {
        while let Some(id) = parent_id {
            let Some(parent) = self.active.get(&id) else {
                return;
            };
            if parent.subtasks.is_empty()
                || !parent
                    .subtasks
                    .iter()
                    .all(|child| self.status_of(child) == Some(TaskStatus::Completed))
            {
                return;
            }

            let Some(parent) = self.active.get_mut(&id) else {
                return;
            };
            let from = parent.status;
            parent.transition(TaskStatus::Completed);
            parent_id = parent.parent_id;

            info!(task_id = %id.short(), "All subtasks completed, parent auto-completed");
            self.emit(TaskEvent::StatusChanged {
                task_id: id,
                from,
                to: TaskStatus::Completed,
            });
            self.emit(TaskEvent::AutoCompleted { task_id: id });
            self.archive(&id);
        }
    }

    /// Purge history entries that finished before `now - max_age`.
    ///
    /// Entries without a completion time (e.g. Cancelled) age from their
    /// creation time. Returns the number of purged entries.
    pub fn cleanup_old_tasks(&mut self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let before = self.history.len();
        let mut purged = Vec::new();
        self.history.retain(|node| {
            let keep = node.finished_at() >= cutoff;
            if !keep {
                purged.push(node.id);
            }
            keep
        });
        for id in &purged {
            self.forget(id);
        }

        let count = before - self.history.len();
        if count > 0 {
            info!(count, "Purged old tasks from history");
            self.emit(TaskEvent::Purged { count });
        }
        count
    }

    // ========== Queries ==========

    fn find_in_history(&self, task_id: &TaskId) -> Option<&TaskNode> {
        self.history.iter().find(|node| node.id == *task_id)
    }

    fn lookup(&self, task_id: &TaskId) -> Option<&TaskNode> {
        self.active
            .get(task_id)
            .or_else(|| self.find_in_history(task_id))
    }

    fn seq_of(&self, task_id: &TaskId) -> u64 {
        self.sequence.get(task_id).copied().unwrap_or(u64::MAX)
    }

    fn status_of(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.lookup(task_id).map(|node| node.status)
    }

    fn all_nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.active.values().chain(self.history.iter())
    }

    pub fn get_task(&self, task_id: &TaskId) -> Option<TaskNode> {
        self.lookup(task_id).cloned()
    }

    /// Highest-priority Pending task whose dependencies are all Completed.
    pub fn get_next_pending_task(&self) -> Option<TaskNode> {
        let candidates = self.active.values().map(|node| (self.seq_of(&node.id), node));
        resolver::next_pending(candidates, |id| self.status_of(id)).cloned()
    }

    /// Tasks matching every set field of `query`, newest first.
    pub fn search_tasks(&self, query: &TaskQuery) -> Vec<TaskNode> {
        let mut found: Vec<&TaskNode> = self.all_nodes().filter(|n| query.matches(n)).collect();
        found.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| self.seq_of(&b.id).cmp(&self.seq_of(&a.id)))
        });
        found.into_iter().cloned().collect()
    }

    pub fn get_task_statistics(&self) -> TaskStatistics {
        TaskStatistics::from_nodes(self.all_nodes())
    }

    pub fn get_current_task_context(&self) -> CurrentTaskContext {
        let current = self.current.and_then(|id| self.get_task(&id));
        let subtasks = current
            .as_ref()
            .map(|node| {
                node.subtasks
                    .iter()
                    .filter_map(|id| self.get_task(id))
                    .collect()
            })
            .unwrap_or_default();

        let mut errors: Vec<&TaskError> = self.all_nodes().flat_map(|n| n.errors.iter()).collect();
        errors.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        CurrentTaskContext {
            current,
            subtasks,
            active_count: self.active.len(),
            pending_count: self.pending_count(),
            recent_errors: errors.into_iter().take(RECENT_LIMIT).cloned().collect(),
            recent_history: self
                .history
                .iter()
                .rev()
                .take(RECENT_LIMIT)
                .cloned()
                .collect(),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn pending_count(&self) -> usize {
        self.active
            .values()
            .filter(|node| node.status == TaskStatus::Pending)
            .count()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn dependency_graph(&self) -> &DependencyGraph {
        &self.graph
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new(&StoreConfig::default())
    }
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStore")
            .field("active", &self.active.len())
            .field("history", &self.history.len())
            .field("current", &self.current)
            .finish()
    }
}
