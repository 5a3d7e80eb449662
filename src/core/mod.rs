//! Task state store and dependency resolution.
//!
//! This module contains the task tree data model, the store that owns it,
//! the dependency resolver and aggregate statistics.

pub mod resolver;
pub mod stats;
pub mod store;
pub mod task;

pub use resolver::DependencyGraph;
pub use stats::{TaskStatistics, ToolUsage};
pub use store::{CurrentTaskContext, SharedTaskStore, TaskEvent, TaskQuery, TaskStore};
pub use task::{
    ErrorKind, Payload, TaskContext, TaskError, TaskId, TaskMetadata, TaskNode, TaskPriority,
    TaskStatus, TaskType,
};
