//! Workflow management types for the orchestrator.
//!
//! This module provides the units of orchestrated work, the collaborations
//! that execute them, and the aggregate state the orchestrator owns.

mod state;
mod types;

pub use state::{AgentCollaboration, WorkflowState};
pub use types::{
    CollaborationId, CollaborationStatus, WorkflowPriority, WorkflowTask, WorkflowTaskId,
    WorkflowTaskKind,
};
