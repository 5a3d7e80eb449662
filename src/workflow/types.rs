//! Core workflow type definitions.

use crate::agent::AgentId;
use crate::core::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a unit of orchestrated work.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowTaskId(pub Uuid);

impl WorkflowTaskId {
    /// Create a new unique workflow task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkflowTaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowTaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkflowTaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Unique identifier for an agent collaboration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollaborationId(pub Uuid);

impl CollaborationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for CollaborationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CollaborationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CollaborationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Type tag of a workflow task.
///
/// The four known kinds select a dedicated phase plan in the executor;
/// any other tag runs the generic processing plan. Serialized as the bare
/// tag string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkflowTaskKind {
    ResourceTransformation,
    LivingOptimization,
    UiCustomization,
    Validation,
    Other(String),
}

impl WorkflowTaskKind {
    pub fn as_str(&self) -> &str {
        match self {
            WorkflowTaskKind::ResourceTransformation => "resource_transformation",
            WorkflowTaskKind::LivingOptimization => "living_optimization",
            WorkflowTaskKind::UiCustomization => "ui_customization",
            WorkflowTaskKind::Validation => "validation",
            WorkflowTaskKind::Other(tag) => tag,
        }
    }

    /// Kinds whose analysis phase needs at least one resource.
    pub fn requires_resources(&self) -> bool {
        matches!(
            self,
            WorkflowTaskKind::ResourceTransformation
                | WorkflowTaskKind::LivingOptimization
                | WorkflowTaskKind::UiCustomization
        )
    }
}

impl From<String> for WorkflowTaskKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "resource_transformation" => WorkflowTaskKind::ResourceTransformation,
            "living_optimization" => WorkflowTaskKind::LivingOptimization,
            "ui_customization" => WorkflowTaskKind::UiCustomization,
            "validation" => WorkflowTaskKind::Validation,
            _ => WorkflowTaskKind::Other(tag),
        }
    }
}

impl From<&str> for WorkflowTaskKind {
    fn from(tag: &str) -> Self {
        Self::from(tag.to_string())
    }
}

impl From<WorkflowTaskKind> for String {
    fn from(kind: WorkflowTaskKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for WorkflowTaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Priority of a workflow task. Ordered so that `Critical` is the highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for WorkflowPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowPriority::Low => write!(f, "low"),
            WorkflowPriority::Medium => write!(f, "medium"),
            WorkflowPriority::High => write!(f, "high"),
            WorkflowPriority::Critical => write!(f, "critical"),
        }
    }
}

/// A unit of orchestrated work waiting for, or running under, a collaboration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub id: WorkflowTaskId,
    pub kind: WorkflowTaskKind,
    pub description: String,
    /// Agents that must all be available before the task is admitted.
    pub required_agents: Vec<AgentId>,
    /// Resource paths or living-instance ids the task operates on.
    pub resources: Vec<String>,
    pub priority: WorkflowPriority,
    pub expected_outcome: String,
    pub created_at: DateTime<Utc>,
    /// Task node updated as the collaboration progresses.
    pub linked_task: Option<TaskId>,
}

impl WorkflowTask {
    pub fn new(kind: impl Into<WorkflowTaskKind>, description: &str) -> Self {
        Self {
            id: WorkflowTaskId::new(),
            kind: kind.into(),
            description: description.to_string(),
            required_agents: Vec::new(),
            resources: Vec::new(),
            priority: WorkflowPriority::default(),
            expected_outcome: String::new(),
            created_at: Utc::now(),
            linked_task: None,
        }
    }

    pub fn with_agents(mut self, agents: &[&str]) -> Self {
        self.required_agents = agents.iter().map(|a| AgentId::new(a)).collect();
        self
    }

    pub fn with_agent_ids(mut self, agents: Vec<AgentId>) -> Self {
        self.required_agents = agents;
        self
    }

    pub fn with_resources<S: AsRef<str>>(mut self, resources: &[S]) -> Self {
        self.resources = resources.iter().map(|r| r.as_ref().to_string()).collect();
        self
    }

    pub fn with_priority(mut self, priority: WorkflowPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_outcome(mut self, expected_outcome: &str) -> Self {
        self.expected_outcome = expected_outcome.to_string();
        self
    }

    pub fn linked_to(mut self, task_id: TaskId) -> Self {
        self.linked_task = Some(task_id);
        self
    }

    /// Whether this task targets `resource` with the given kind.
    pub fn targets(&self, kind: &WorkflowTaskKind, resource: &str) -> bool {
        self.kind == *kind && self.resources.iter().any(|r| r == resource)
    }
}

/// Status of an agent collaboration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationStatus {
    #[default]
    Queued,
    Active,
    Paused,
    Completed,
    Failed,
}

impl CollaborationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CollaborationStatus::Completed | CollaborationStatus::Failed)
    }
}

impl std::fmt::Display for CollaborationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollaborationStatus::Queued => write!(f, "queued"),
            CollaborationStatus::Active => write!(f, "active"),
            CollaborationStatus::Paused => write!(f, "paused"),
            CollaborationStatus::Completed => write!(f, "completed"),
            CollaborationStatus::Failed => write!(f, "failed"),
        }
    }
}
