//! Aggregate statistics over task nodes.

use crate::core::task::{TaskNode, TaskPriority, TaskStatus, TaskType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Number of tools reported in [`TaskStatistics::top_tools`].
pub const TOP_TOOLS: usize = 5;

/// Usage count for one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub tool: String,
    pub count: usize,
}

/// Summary of everything the store currently knows about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskStatistics {
    pub total: usize,
    pub by_status: BTreeMap<TaskStatus, usize>,
    pub by_type: BTreeMap<TaskType, usize>,
    pub by_priority: BTreeMap<TaskPriority, usize>,
    /// Mean of `completed_at - started_at` in seconds, over nodes that have both.
    pub average_execution_secs: f64,
    pub top_tools: Vec<ToolUsage>,
    /// completed / (completed + failed), 0.0 when neither occurred.
    pub success_rate: f64,
}

impl TaskStatistics {
    pub fn from_nodes<'a>(nodes: impl IntoIterator<Item = &'a TaskNode>) -> Self {
        let mut stats = TaskStatistics::default();
        let mut tool_counts: HashMap<&str, usize> = HashMap::new();
        let mut timed = 0usize;
        let mut total_secs = 0.0f64;

        for node in nodes {
            stats.total += 1;
            *stats.by_status.entry(node.status).or_insert(0) += 1;
            *stats.by_type.entry(node.task_type).or_insert(0) += 1;
            *stats.by_priority.entry(node.priority).or_insert(0) += 1;

            if let Some(elapsed) = node.execution_time() {
                timed += 1;
                total_secs += elapsed.num_milliseconds() as f64 / 1000.0;
            }
            for tool in &node.tools_used {
                *tool_counts.entry(tool.as_str()).or_insert(0) += 1;
            }
        }

        if timed > 0 {
            stats.average_execution_secs = total_secs / timed as f64;
        }

        let mut tools: Vec<ToolUsage> = tool_counts
            .into_iter()
            .map(|(tool, count)| ToolUsage {
                tool: tool.to_string(),
                count,
            })
            .collect();
        tools.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tool.cmp(&b.tool)));
        tools.truncate(TOP_TOOLS);
        stats.top_tools = tools;

        let completed = stats.count_status(TaskStatus::Completed);
        let failed = stats.count_status(TaskStatus::Failed);
        if completed + failed > 0 {
            stats.success_rate = completed as f64 / (completed + failed) as f64;
        }

        stats
    }

    pub fn count_status(&self, status: TaskStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}
