//! Agent identities, static roles and live availability.
//!
//! Roles are loaded once from configuration and never change afterwards.
//! Availability lives in the orchestrator's workflow state as an
//! [`AgentStatus`] per agent.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of a collaborating agent, e.g. `"scanner"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static definition of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRole {
    pub id: AgentId,
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub specializations: Vec<String>,
}

impl AgentRole {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: AgentId::new(id),
            name: name.to_string(),
            capabilities: Vec::new(),
            specializations: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_specializations(mut self, specializations: &[&str]) -> Self {
        self.specializations = specializations.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Roster used when the configuration file defines no agents.
    pub fn default_roster() -> Vec<AgentRole> {
        vec![
            AgentRole::new("scanner", "Resource Scanner")
                .with_capabilities(&["analysis", "security_scan"])
                .with_specializations(&["resource_transformation"]),
            AgentRole::new("adapter", "Resource Adapter")
                .with_capabilities(&["transform", "integration"])
                .with_specializations(&["resource_transformation", "ui_customization"]),
            AgentRole::new("optimizer", "Living Instance Optimizer")
                .with_capabilities(&["optimize", "metrics"])
                .with_specializations(&["living_optimization"]),
            AgentRole::new("designer", "Interface Designer")
                .with_capabilities(&["ui_generation"])
                .with_specializations(&["ui_customization"]),
            AgentRole::new("validator", "Validation Agent")
                .with_capabilities(&["validation", "review"])
                .with_specializations(&["validation"]),
        ]
    }
}

/// Immutable set of agent roles, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    roles: BTreeMap<AgentId, AgentRole>,
}

impl AgentRegistry {
    pub fn new(roles: Vec<AgentRole>) -> Self {
        Self {
            roles: roles.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    pub fn get(&self, id: &AgentId) -> Option<&AgentRole> {
        self.roles.get(id)
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.roles.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &AgentId> {
        self.roles.keys()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

/// Live availability of an agent.
///
/// Rendered as the human-readable strings dashboards display:
/// `initialized`, `idle`, `idle - task failed`, `busy on <task type>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum AgentStatus {
    /// Registered at startup, never assigned.
    Initialized,
    /// Released after a successful collaboration.
    Idle,
    /// Released after a failed or cancelled collaboration.
    IdleAfterFailure,
    /// Participating in a collaboration.
    Busy { task_type: String },
}

impl AgentStatus {
    pub fn is_available(&self) -> bool {
        !matches!(self, AgentStatus::Busy { .. })
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Initialized => write!(f, "initialized"),
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::IdleAfterFailure => write!(f, "idle - task failed"),
            AgentStatus::Busy { task_type } => write!(f, "busy on {}", task_type),
        }
    }
}
