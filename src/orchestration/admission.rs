//! Capacity admission for queued workflow tasks.
//!
//! Each tick the orchestrator asks [`admit`] which queued tasks may start.
//! A task starts when every agent it needs is registered and available and
//! the system load is below the ceiling. Tasks that do not qualify stay in
//! the queue, in place.

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::workflow::{AgentCollaboration, CollaborationStatus, WorkflowState, WorkflowTask};
use std::cmp::Reverse;
use tracing::debug;

/// Limits applied by [`admit`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionPolicy {
    /// Maximum queued tasks considered per tick.
    pub batch: usize,
    /// Admission is refused while `system_load >= load_ceiling`.
    pub load_ceiling: f64,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for AdmissionPolicy {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            batch: config.admission_batch,
            load_ceiling: config.load_ceiling,
        }
    }
}

/// Why a candidate was not admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refusal {
    Overloaded,
    UnknownAgent(String),
    AgentBusy(String),
}

/// Check a single task against the current state.
pub fn check(
    state: &WorkflowState,
    task: &WorkflowTask,
    policy: &AdmissionPolicy,
) -> std::result::Result<(), Refusal> {
    for agent in &task.required_agents {
        match state.agent_statuses.get(agent) {
            None => return Err(Refusal::UnknownAgent(agent.to_string())),
            Some(status) if !status.is_available() => {
                return Err(Refusal::AgentBusy(agent.to_string()))
            }
            Some(_) => {}
        }
    }
    if state.system_load >= policy.load_ceiling {
        return Err(Refusal::Overloaded);
    }
    Ok(())
}

/// Promote eligible queued tasks to Active collaborations.
///
/// Candidates are the first `policy.batch` queued tasks by priority,
/// highest first, in submission order within a priority. Admitted tasks
/// leave the queue and their agents become busy. Returns the new
/// collaborations in admission order.
pub fn admit(
    state: &mut WorkflowState,
    policy: &AdmissionPolicy,
) -> Result<Vec<AgentCollaboration>> {
    let mut order: Vec<usize> = (0..state.queued.len()).collect();
    order.sort_by_key(|&i| Reverse(state.queued[i].priority));
    order.truncate(policy.batch);

    let mut admitted_ids = Vec::new();
    for i in order {
        let task = &state.queued[i];
        match check(state, task, policy) {
            Ok(()) => {
                let agents = task.required_agents.clone();
                let kind = task.kind.to_string();
                admitted_ids.push(task.id);
                // later candidates in the batch see these agents as busy
                state.mark_busy(&agents, &kind);
            }
            Err(reason) => {
                debug!(task_id = %task.id.short(), ?reason, "Task stays queued");
            }
        }
    }

    let mut admitted = Vec::with_capacity(admitted_ids.len());
    for id in admitted_ids {
        let Some(pos) = state.queued.iter().position(|t| t.id == id) else {
            continue;
        };
        let task = state.queued.remove(pos);
        let mut collab = AgentCollaboration::new(task);
        collab.transition(CollaborationStatus::Active)?;
        debug!(
            collaboration = %collab.id.short(),
            kind = %collab.task.kind,
            "Collaboration admitted"
        );
        state.active.push(collab.clone());
        admitted.push(collab);
    }
    Ok(admitted)
}
