//! Work functions invoked by collaboration phases.
//!
//! The executor never does domain work itself; each phase calls one method
//! of a [`Collaborator`]. Failures are reported as [`TaskError`]s so the
//! executor can decide whether to retry.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::task::{ErrorKind, TaskError};
use crate::workflow::WorkflowTask;

use super::catalog::InMemoryCatalog;

/// Result of one successful work function call.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Line appended to the collaboration log.
    pub output: String,
    /// Identifier produced by the step, e.g. a new living instance id.
    pub artifact: Option<String>,
}

impl StepOutcome {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            artifact: None,
        }
    }

    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }
}

pub type StepResult = std::result::Result<StepOutcome, TaskError>;

#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Turn a resource into a living instance; the artifact is its id.
    async fn transform(&self, resource: &str) -> StepResult;

    async fn optimize(&self, instance: &str) -> StepResult;

    async fn customize_ui(&self, resource: &str) -> StepResult;

    async fn validate(&self, task: &WorkflowTask) -> StepResult;

    /// Generic work for task kinds without a dedicated plan.
    async fn process(&self, task: &WorkflowTask) -> StepResult;
}

/// Collaborator that applies every step to an [`InMemoryCatalog`].
#[derive(Debug, Clone)]
pub struct SimulatedCollaborator {
    catalog: Arc<InMemoryCatalog>,
}

impl SimulatedCollaborator {
    pub fn new(catalog: Arc<InMemoryCatalog>) -> Self {
        Self { catalog }
    }
}

fn unknown(what: &str, id: &str) -> TaskError {
    TaskError::new(ErrorKind::DataError, format!("unknown {}: {}", what, id))
}

#[async_trait]
impl Collaborator for SimulatedCollaborator {
    async fn transform(&self, resource: &str) -> StepResult {
        let instance = self
            .catalog
            .mark_transformed(resource)
            .await
            .ok_or_else(|| unknown("resource", resource))?;
        Ok(
            StepOutcome::new(format!("transformed {} into {}", resource, instance))
                .with_artifact(instance),
        )
    }

    async fn optimize(&self, instance: &str) -> StepResult {
        if !self.catalog.record_optimization(instance).await {
            return Err(unknown("living instance", instance));
        }
        Ok(StepOutcome::new(format!("optimized {}", instance)))
    }

    async fn customize_ui(&self, resource: &str) -> StepResult {
        if !self.catalog.mark_customized(resource).await {
            return Err(unknown("resource", resource));
        }
        Ok(StepOutcome::new(format!("generated interface for {}", resource)))
    }

    async fn validate(&self, task: &WorkflowTask) -> StepResult {
        Ok(StepOutcome::new(format!(
            "validated {} ({} resources)",
            task.kind,
            task.resources.len()
        )))
    }

    async fn process(&self, task: &WorkflowTask) -> StepResult {
        Ok(StepOutcome::new(format!("processed {}", task.kind)))
    }
}
