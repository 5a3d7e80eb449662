//! TOML task plans for the `plan` command.
//!
//! A plan lists tasks by key. Children name their parent, and ordering
//! constraints name the tasks they wait for:
//!
//! ```toml
//! [[tasks]]
//! key = "release"
//! title = "Ship the release"
//!
//! [[tasks]]
//! key = "build"
//! title = "Build artifacts"
//! parent = "release"
//! type = "tool_execution"
//! tools = ["cargo"]
//!
//! [[tasks]]
//! key = "publish"
//! title = "Publish"
//! parent = "release"
//! priority = "high"
//! depends_on = ["build"]
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::store::TaskStore;
use crate::core::task::{
    ErrorKind, Payload, TaskError, TaskId, TaskNode, TaskPriority, TaskStatus, TaskType,
};
use crate::core::TaskStatistics;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTask {
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_task_type", rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Tools recorded on the task when it runs.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Fail the task instead of completing it.
    #[serde(default)]
    pub fail: bool,
}

fn default_task_type() -> TaskType {
    TaskType::DataProcessing
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub tasks: Vec<PlannedTask>,
}

/// Result of driving a plan to quiescence.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    /// Keys sorted so every task follows the tasks it depends on.
    pub dependency_order: Vec<String>,
    /// Keys in the order their tasks were started.
    pub execution_order: Vec<String>,
    pub statistics: TaskStatistics,
}

impl Plan {
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Plan::load");
        let plan: Self = toml::from_str(&fs::read_to_string(path)?)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Keys are unique, and every parent and dependency names an earlier
    /// or later task of the plan. Parents must be declared before children.
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (index, task) in self.tasks.iter().enumerate() {
            if seen.insert(task.key.as_str(), index).is_some() {
                return Err(Error::Validation(format!("duplicate task key: {}", task.key)));
            }
            if let Some(parent) = &task.parent {
                if !seen.contains_key(parent.as_str()) || parent == &task.key {
                    return Err(Error::Validation(format!(
                        "task {} names parent {} before it is declared",
                        task.key, parent
                    )));
                }
            }
        }
        for task in &self.tasks {
            if let Some(dep) = task.depends_on.iter().find(|d| !seen.contains_key(d.as_str())) {
                return Err(Error::Validation(format!(
                    "task {} depends on unknown task {}",
                    task.key, dep
                )));
            }
        }
        Ok(())
    }

    /// Create every task in `store`, wiring parents and dependencies.
    pub fn apply(&self, store: &mut TaskStore) -> Result<HashMap<String, TaskId>> {
        let mut ids: HashMap<String, TaskId> = HashMap::new();
        for task in &self.tasks {
            let node = TaskNode::new(&task.title, &task.description, task.task_type, task.priority);
            let id = node.id;
            match &task.parent {
                Some(parent) => {
                    let parent_id = ids
                        .get(parent)
                        .ok_or_else(|| Error::Validation(format!("unknown parent {}", parent)))?;
                    store
                        .decompose_task(parent_id, vec![node])
                        .ok_or_else(|| Error::TaskNotFound(parent_id.to_string()))?;
                }
                None => {
                    store.insert_task(node);
                }
            }
            ids.insert(task.key.clone(), id);
        }

        for task in &self.tasks {
            for dep in &task.depends_on {
                store.add_dependency(&ids[&task.key], &ids[dep])?;
            }
        }
        info!(tasks = ids.len(), "Plan applied");
        Ok(ids)
    }

    /// Run the plan: start the next eligible task until none is left.
    ///
    /// Tasks with subtasks are only started; they complete once their
    /// subtasks have.
    pub fn drive(&self, store: &mut TaskStore) -> Result<PlanReport> {
        let ids = self.apply(store)?;
        let keys: HashMap<TaskId, &PlannedTask> = self
            .tasks
            .iter()
            .map(|task| (ids[&task.key], task))
            .collect();
        let dependency_order = store
            .dependency_graph()
            .topological_order()?
            .iter()
            .filter_map(|id| keys.get(id).map(|task| task.key.clone()))
            .collect();

        let mut execution_order = Vec::new();
        while let Some(node) = store.get_next_pending_task() {
            let planned = keys
                .get(&node.id)
                .ok_or_else(|| Error::TaskNotFound(node.id.to_string()))?;
            execution_order.push(planned.key.clone());
            store.update_task_status(&node.id, TaskStatus::InProgress, None, None);
            if !node.subtasks.is_empty() {
                continue;
            }

            for tool in &planned.tools {
                let output = serde_json::json!({ "ok": !planned.fail });
                store.add_tool_execution(&node.id, tool, output);
            }
            if planned.fail {
                let error =
                    TaskError::new(ErrorKind::ValidationError, format!("{} failed", planned.key));
                store.update_task_status(&node.id, TaskStatus::Failed, None, Some(error));
            } else {
                let mut outputs = Payload::new();
                let result = format!("{} done", planned.key);
                outputs.insert("result".to_string(), serde_json::json!(result));
                store.update_task_status(&node.id, TaskStatus::Completed, Some(outputs), None);
            }
        }

        Ok(PlanReport {
            dependency_order,
            execution_order,
            statistics: store.get_task_statistics(),
        })
    }
}
