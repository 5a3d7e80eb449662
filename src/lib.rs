pub mod agent;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod plan;
pub mod util;
pub mod workflow;

pub use agent::{AgentId, AgentRegistry, AgentRole, AgentStatus};
pub use config::Config;
pub use crate::core::{TaskId, TaskNode, TaskPriority, TaskStatus, TaskStore, TaskType};
pub use error::{Error, Result};
pub use orchestration::{Orchestrator, OrchestratorEvent};
