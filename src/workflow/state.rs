//! Collaboration lifecycle and the orchestrator's workflow state.
//!
//! `AgentCollaboration` enforces valid status transitions:
//!
//! Queued -> Active -> Completed | Failed, Active -> Paused, Paused -> Queued
//!
//! `WorkflowState` is the aggregate the orchestrator owns: queued tasks,
//! active and paused collaborations, completed tasks, per-agent status and
//! the system load ratio.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::agent::{AgentId, AgentStatus};
use crate::config::SchedulerConfig;
use crate::core::task::TaskError;
use crate::error::{Error, Result};

use super::{CollaborationId, CollaborationStatus, WorkflowTask};

/// A group of agents working on one workflow task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCollaboration {
    pub id: CollaborationId,
    pub participants: Vec<AgentId>,
    pub task: WorkflowTask,
    pub status: CollaborationStatus,
    /// Fraction of the phase plan finished, within [0, 1].
    pub progress: f64,
    /// One line per finished phase, in order.
    pub outputs: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub failure: Option<TaskError>,
}

impl AgentCollaboration {
    /// Create a Queued collaboration for `task` with its required agents.
    pub fn new(task: WorkflowTask) -> Self {
        let now = Utc::now();
        Self {
            id: CollaborationId::new(),
            participants: task.required_agents.clone(),
            task,
            status: CollaborationStatus::Queued,
            progress: 0.0,
            outputs: Vec::new(),
            started_at: now,
            last_update: now,
            failure: None,
        }
    }

    pub fn can_transition(&self, target: CollaborationStatus) -> bool {
        use CollaborationStatus::*;
        matches!(
            (self.status, target),
            (Queued, Active)
                | (Active, Completed)
                | (Active, Failed)
                | (Active, Paused)
                | (Paused, Queued)
        )
    }

    /// Move to `target`, refusing transitions outside the lifecycle.
    pub fn transition(&mut self, target: CollaborationStatus) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }
        self.status = target;
        self.last_update = Utc::now();
        Ok(())
    }

    /// Record a finished phase. Progress never decreases.
    pub fn advance(&mut self, progress: f64, line: impl Into<String>) {
        self.progress = self.progress.max(progress.clamp(0.0, 1.0));
        self.outputs.push(line.into());
        self.last_update = Utc::now();
    }

    pub fn touch(&mut self) {
        self.last_update = Utc::now();
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition(CollaborationStatus::Completed)?;
        self.progress = 1.0;
        Ok(())
    }

    pub fn fail(&mut self, error: TaskError) -> Result<()> {
        self.transition(CollaborationStatus::Failed)?;
        self.failure = Some(error);
        Ok(())
    }

    pub fn involves(&self, agent: &AgentId) -> bool {
        self.participants.contains(agent)
    }
}

/// Everything the orchestrator tracks about in-flight work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowState {
    pub active: Vec<AgentCollaboration>,
    pub queued: Vec<WorkflowTask>,
    pub completed: Vec<WorkflowTask>,
    pub paused: Vec<AgentCollaboration>,
    pub agent_statuses: BTreeMap<AgentId, AgentStatus>,
    /// active / max_concurrent, capped at 1.0.
    pub system_load: f64,
    #[serde(skip)]
    max_concurrent: usize,
}

impl WorkflowState {
    /// Create a state with every agent `initialized`.
    pub fn new<'a>(agents: impl IntoIterator<Item = &'a AgentId>) -> Self {
        Self {
            agent_statuses: agents
                .into_iter()
                .map(|id| (id.clone(), AgentStatus::Initialized))
                .collect(),
            max_concurrent: SchedulerConfig::default().max_concurrent,
            ..Self::default()
        }
    }

    /// Set the capacity `system_load` is measured against.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn queue(&mut self, task: WorkflowTask) {
        self.queued.push(task);
    }

    pub fn active_collaboration(&self, id: &CollaborationId) -> Option<&AgentCollaboration> {
        self.active.iter().find(|c| c.id == *id)
    }

    pub fn active_collaboration_mut(
        &mut self,
        id: &CollaborationId,
    ) -> Option<&mut AgentCollaboration> {
        self.active.iter_mut().find(|c| c.id == *id)
    }

    fn take_active(&mut self, id: &CollaborationId) -> Result<AgentCollaboration> {
        let pos = self
            .active
            .iter()
            .position(|c| c.id == *id)
            .ok_or_else(|| Error::CollaborationNotFound(id.to_string()))?;
        Ok(self.active.remove(pos))
    }

    /// Whether the agent is registered and not busy.
    pub fn agent_available(&self, agent: &AgentId) -> bool {
        self.agent_statuses
            .get(agent)
            .is_some_and(AgentStatus::is_available)
    }

    pub fn mark_busy(&mut self, agents: &[AgentId], task_type: &str) {
        for agent in agents {
            self.agent_statuses.insert(
                agent.clone(),
                AgentStatus::Busy {
                    task_type: task_type.to_string(),
                },
            );
        }
    }

    pub fn release_agents(&mut self, agents: &[AgentId], status: AgentStatus) {
        for agent in agents {
            if let Some(current) = self.agent_statuses.get_mut(agent) {
                *current = status.clone();
            }
        }
    }

    /// Finish an active collaboration successfully.
    ///
    /// The collaboration leaves the active list, its task is recorded as
    /// completed and its agents return to `idle`.
    pub fn complete_collaboration(&mut self, id: &CollaborationId) -> Result<AgentCollaboration> {
        let collab = self
            .active_collaboration_mut(id)
            .ok_or_else(|| Error::CollaborationNotFound(id.to_string()))?;
        collab.complete()?;
        let done = self.take_active(id)?;
        self.completed.push(done.task.clone());
        self.release_agents(&done.participants, AgentStatus::Idle);
        self.refresh_load();
        Ok(done)
    }

    /// Fail an active collaboration and drop it. The task is not requeued.
    pub fn fail_collaboration(
        &mut self,
        id: &CollaborationId,
        error: TaskError,
    ) -> Result<AgentCollaboration> {
        let collab = self
            .active_collaboration_mut(id)
            .ok_or_else(|| Error::CollaborationNotFound(id.to_string()))?;
        collab.fail(error)?;
        let failed = self.take_active(id)?;
        self.release_agents(&failed.participants, AgentStatus::IdleAfterFailure);
        self.refresh_load();
        Ok(failed)
    }

    /// Pause an active collaboration, moving it to the paused list.
    pub fn pause_collaboration(&mut self, id: &CollaborationId) -> Result<AgentCollaboration> {
        let collab = self
            .active_collaboration_mut(id)
            .ok_or_else(|| Error::CollaborationNotFound(id.to_string()))?;
        collab.transition(CollaborationStatus::Paused)?;
        let paused = self.take_active(id)?;
        self.release_agents(&paused.participants, AgentStatus::Idle);
        self.paused.push(paused.clone());
        self.refresh_load();
        Ok(paused)
    }

    /// Requeue the task of a paused collaboration.
    pub fn resume_collaboration(&mut self, id: &CollaborationId) -> Result<WorkflowTask> {
        let pos = self
            .paused
            .iter()
            .position(|c| c.id == *id)
            .ok_or_else(|| Error::CollaborationNotFound(id.to_string()))?;
        self.paused[pos].transition(CollaborationStatus::Queued)?;
        let collab = self.paused.remove(pos);
        self.queued.push(collab.task.clone());
        Ok(collab.task)
    }

    /// Collaborations still running, i.e. Active ones.
    pub fn running_count(&self) -> usize {
        self.active
            .iter()
            .filter(|c| c.status == CollaborationStatus::Active)
            .count()
    }

    /// Recompute `system_load = min(1.0, active / max_concurrent)`.
    pub fn recompute_load(&mut self, max_concurrent: usize) -> f64 {
        self.max_concurrent = max_concurrent;
        self.refresh_load()
    }

    /// Recompute `system_load` against the stored capacity.
    pub fn refresh_load(&mut self) -> f64 {
        let max = self.max_concurrent.max(1) as f64;
        self.system_load = (self.running_count() as f64 / max).min(1.0);
        self.system_load
    }

    /// Every collaboration, active or paused, that the agent takes part in.
    pub fn agent_collaborations(&self, agent: &AgentId) -> Vec<&AgentCollaboration> {
        self.active
            .iter()
            .chain(self.paused.iter())
            .filter(|c| c.involves(agent))
            .collect()
    }

    pub fn busy_agent_count(&self) -> usize {
        self.agent_statuses
            .values()
            .filter(|s| !s.is_available())
            .count()
    }

    /// Whether a queued or running task of `kind` already targets `resource`.
    pub fn is_targeted(&self, kind: &super::WorkflowTaskKind, resource: &str) -> bool {
        self.queued.iter().any(|t| t.targets(kind, resource))
            || self
                .active
                .iter()
                .filter(|c| c.status == CollaborationStatus::Active)
                .any(|c| c.task.targets(kind, resource))
    }
}
