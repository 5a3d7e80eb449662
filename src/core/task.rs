//! Task data model for the goal-decomposition tree.
//!
//! A [`TaskNode`] is one unit of a decomposed goal. Nodes track status,
//! priority, dependencies on other nodes, their place in the parent/child
//! tree, execution outcome and the tools used along the way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Free-form input/output payload of a task.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for a task node.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What kind of work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    UserRequest,
    GoalDecomposition,
    ToolExecution,
    DataProcessing,
    Validation,
    Learning,
    SystemOperation,
    Reflection,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskType::UserRequest => "user_request",
            TaskType::GoalDecomposition => "goal_decomposition",
            TaskType::ToolExecution => "tool_execution",
            TaskType::DataProcessing => "data_processing",
            TaskType::Validation => "validation",
            TaskType::Learning => "learning",
            TaskType::SystemOperation => "system_operation",
            TaskType::Reflection => "reflection",
        };
        write!(f, "{}", s)
    }
}

/// Task status in its lifecycle.
///
/// `Completed`, `Failed` and `Cancelled` are terminal: once reached, the
/// node is frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task created, waiting for dependencies or a worker.
    #[default]
    Pending,
    /// Task is being executed.
    InProgress,
    /// Task completed successfully.
    Completed,
    /// Task failed.
    Failed,
    /// Task cannot proceed until something external changes.
    Blocked,
    /// Task was cancelled before finishing.
    Cancelled,
    /// Task execution was suspended.
    Paused,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Paused => "paused",
        };
        write!(f, "{}", s)
    }
}

/// Scheduling priority. Ordered so that `Critical` is the highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// Classification of a task or collaboration failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ToolError,
    ValidationError,
    DependencyError,
    TimeoutError,
    SystemError,
    UserError,
    DataError,
}

impl ErrorKind {
    /// Only tool failures and timeouts are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::ToolError | ErrorKind::TimeoutError)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::ToolError => "tool_error",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::DependencyError => "dependency_error",
            ErrorKind::TimeoutError => "timeout_error",
            ErrorKind::SystemError => "system_error",
            ErrorKind::UserError => "user_error",
            ErrorKind::DataError => "data_error",
        };
        write!(f, "{}", s)
    }
}

/// An error recorded against a task or collaboration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
    pub recoverable: bool,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl TaskError {
    /// Create an error; recoverability defaults to the kind's retry policy.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            recoverable: kind.is_retryable(),
            retry_count: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Typed execution context, one shape per kind of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TaskContext {
    #[default]
    General,
    UserRequest {
        origin: Option<String>,
    },
    GoalDecomposition {
        strategy: Option<String>,
    },
    ToolExecution {
        tool: String,
    },
    DataProcessing {
        source: Option<String>,
    },
    Validation {
        criteria: Vec<String>,
    },
    Learning {
        topic: String,
    },
    SystemOperation {
        operation: String,
    },
    Reflection {
        subject: Option<TaskId>,
    },
}

/// Structured metadata kept alongside a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskMetadata {
    /// Number of subtasks recorded at decomposition time.
    pub subtask_count: Option<usize>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: BTreeMap<String, String>,
}

/// A node in the goal-decomposition tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Parent task, set when this node was attached by decomposition.
    pub parent_id: Option<TaskId>,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// Tasks that must be completed before this one may leave Pending.
    pub dependencies: BTreeSet<TaskId>,
    /// Child tasks in decomposition order.
    pub subtasks: Vec<TaskId>,
    pub context: TaskContext,
    pub inputs: Payload,
    pub outputs: Payload,
    pub errors: Vec<TaskError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub tools_used: Vec<String>,
    pub metadata: TaskMetadata,
}

impl TaskNode {
    /// Create a new Pending task with a generated ID and current timestamp.
    pub fn new(
        title: &str,
        description: &str,
        task_type: TaskType,
        priority: TaskPriority,
    ) -> Self {
        Self {
            id: TaskId::new(),
            parent_id: None,
            title: title.to_string(),
            description: description.to_string(),
            task_type,
            status: TaskStatus::Pending,
            priority,
            dependencies: BTreeSet::new(),
            subtasks: Vec::new(),
            context: TaskContext::General,
            inputs: Payload::new(),
            outputs: Payload::new(),
            errors: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            tools_used: Vec::new(),
            metadata: TaskMetadata::default(),
        }
    }

    pub fn with_context(mut self, context: TaskContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_inputs(mut self, inputs: Payload) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn depends_on(mut self, id: TaskId) -> Self {
        self.dependencies.insert(id);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a status transition with the timestamp rules.
    ///
    /// `started_at` is stamped on the first entry into InProgress and
    /// `completed_at` on the first entry into Completed or Failed.
    /// Returns `false` without touching the node when it is terminal.
    pub fn transition(&mut self, status: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        let now = Utc::now();
        match status {
            TaskStatus::InProgress if self.started_at.is_none() => {
                self.started_at = Some(now);
            }
            TaskStatus::Completed | TaskStatus::Failed if self.completed_at.is_none() => {
                self.completed_at = Some(now);
            }
            _ => {}
        }
        self.status = status;
        true
    }

    /// Wall-clock execution time, when both timestamps are known.
    pub fn execution_time(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Timestamp used for history retention.
    pub fn finished_at(&self) -> DateTime<Utc> {
        self.completed_at.unwrap_or(self.created_at)
    }
}
