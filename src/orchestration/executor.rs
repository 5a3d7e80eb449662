//! Collaboration executor.
//!
//! Each admitted collaboration runs as its own tokio task and walks a
//! linear phase plan chosen by the task kind:
//!
//! - `resource_transformation`: analysis, transform, validate
//! - `living_optimization`: analysis, optimize, validate
//! - `ui_customization`: analysis, generate UI, validate
//! - `validation`: validate
//! - anything else: processing, done
//!
//! After each phase progress rises to `(phase + 1) / phases`. Every
//! collaborator call runs under the phase timeout; tool errors and timeouts
//! are retried up to `max_retries` times. Phases over several resources
//! retry only the failing resource. The cancellation token is honored between phases,
//! during the inter-phase delay and while a phase is running.
//!
//! Shared state is updated under one workflow write guard per transition.
//! The linked task node, if any, is updated afterwards with the workflow
//! lock released.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::core::store::SharedTaskStore;
use crate::core::task::{ErrorKind, Payload, TaskError, TaskStatus};
use crate::util::with_timeout;
use crate::workflow::{CollaborationId, WorkflowState, WorkflowTask, WorkflowTaskKind};

use super::collaborator::{Collaborator, StepOutcome, StepResult};
use super::orchestrator::OrchestratorEvent;

/// Timing and retry limits for phase execution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutorSettings {
    pub phase_delay: Duration,
    pub phase_timeout: Duration,
    pub max_retries: u32,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for ExecutorSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            phase_delay: config.phase_delay(),
            phase_timeout: config.phase_timeout(),
            max_retries: config.max_retries,
        }
    }
}

/// One step of a collaboration's plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Analysis,
    Transform,
    Optimize,
    GenerateUi,
    Validate,
    Processing,
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Analysis => write!(f, "analysis"),
            Phase::Transform => write!(f, "transform"),
            Phase::Optimize => write!(f, "optimize"),
            Phase::GenerateUi => write!(f, "generate_ui"),
            Phase::Validate => write!(f, "validate"),
            Phase::Processing => write!(f, "processing"),
            Phase::Done => write!(f, "done"),
        }
    }
}

/// Phase plan for a task kind.
pub fn phase_plan(kind: &WorkflowTaskKind) -> &'static [Phase] {
    match kind {
        WorkflowTaskKind::ResourceTransformation => {
            &[Phase::Analysis, Phase::Transform, Phase::Validate]
        }
        WorkflowTaskKind::LivingOptimization => {
            &[Phase::Analysis, Phase::Optimize, Phase::Validate]
        }
        WorkflowTaskKind::UiCustomization => {
            &[Phase::Analysis, Phase::GenerateUi, Phase::Validate]
        }
        WorkflowTaskKind::Validation => &[Phase::Validate],
        WorkflowTaskKind::Other(_) => &[Phase::Processing, Phase::Done],
    }
}

/// How a collaboration ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed,
    Failed(TaskError),
    Paused,
}

enum Interrupt {
    Cancelled,
    Failed(TaskError),
}

/// Runs admitted collaborations against a [`Collaborator`].
#[derive(Clone)]
pub struct Executor {
    workflow: Arc<RwLock<WorkflowState>>,
    store: SharedTaskStore,
    collaborator: Arc<dyn Collaborator>,
    settings: ExecutorSettings,
    events: broadcast::Sender<OrchestratorEvent>,
}

impl Executor {
    pub fn new(
        workflow: Arc<RwLock<WorkflowState>>,
        store: SharedTaskStore,
        collaborator: Arc<dyn Collaborator>,
        settings: ExecutorSettings,
        events: broadcast::Sender<OrchestratorEvent>,
    ) -> Self {
        Self {
            workflow,
            store,
            collaborator,
            settings,
            events,
        }
    }

    fn emit(&self, event: OrchestratorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Run a collaboration on its own tokio task.
    pub fn spawn(
        &self,
        id: CollaborationId,
        task: WorkflowTask,
        cancel: CancellationToken,
    ) -> JoinHandle<ExecutionOutcome> {
        let executor = self.clone();
        tokio::spawn(async move { executor.run(id, task, cancel).await })
    }

    /// Drive the collaboration through its phase plan to a terminal state.
    pub async fn run(
        &self,
        id: CollaborationId,
        task: WorkflowTask,
        cancel: CancellationToken,
    ) -> ExecutionOutcome {
        let phases = phase_plan(&task.kind);
        let total = phases.len();
        debug!(collaboration = %id.short(), kind = %task.kind, phases = total, "Executor started");

        for (i, phase) in phases.iter().enumerate() {
            if cancel.is_cancelled() {
                return self.pause(&id, &task).await;
            }

            let outcome = match self.run_phase(*phase, &task, &cancel).await {
                Ok(outcome) => outcome,
                Err(Interrupt::Cancelled) => return self.pause(&id, &task).await,
                Err(Interrupt::Failed(error)) => return self.fail(&id, &task, error).await,
            };

            let progress = (i + 1) as f64 / total as f64;
            if let Err(error) = self.record_phase(&id, &task, *phase, &outcome, progress).await {
                return self.fail(&id, &task, error).await;
            }

            if i + 1 < total {
                tokio::select! {
                    _ = cancel.cancelled() => return self.pause(&id, &task).await,
                    _ = tokio::time::sleep(self.settings.phase_delay) => {}
                }
            }
        }

        self.complete(&id, &task).await
    }

    async fn run_phase(
        &self,
        phase: Phase,
        task: &WorkflowTask,
        cancel: &CancellationToken,
    ) -> std::result::Result<StepOutcome, Interrupt> {
        match phase {
            Phase::Analysis => {
                if task.kind.requires_resources() && task.resources.is_empty() {
                    return Err(Interrupt::Failed(TaskError::new(
                        ErrorKind::ValidationError,
                        format!("{} task has no resources to analyze", task.kind),
                    )));
                }
                Ok(StepOutcome::new(format!("analyzed {} resources", task.resources.len())))
            }
            Phase::Transform => {
                self.for_each_resource(phase, task, cancel, |r| self.collaborator.transform(r))
                    .await
            }
            Phase::Optimize => {
                self.for_each_resource(phase, task, cancel, |r| self.collaborator.optimize(r))
                    .await
            }
            Phase::GenerateUi => {
                self.for_each_resource(phase, task, cancel, |r| self.collaborator.customize_ui(r))
                    .await
            }
            Phase::Validate => {
                self.with_retries(phase, task, cancel, || self.collaborator.validate(task))
                    .await
            }
            Phase::Processing => {
                self.with_retries(phase, task, cancel, || self.collaborator.process(task))
                    .await
            }
            Phase::Done => Ok(StepOutcome::new("done")),
        }
    }

    /// Run one collaborator call under the phase timeout, retrying
    /// retryable errors.
    async fn with_retries<F, Fut>(
        &self,
        phase: Phase,
        task: &WorkflowTask,
        cancel: &CancellationToken,
        call: F,
    ) -> std::result::Result<StepOutcome, Interrupt>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = StepResult>,
    {
        let mut retries = 0u32;
        loop {
            let attempt = with_timeout(self.settings.phase_timeout, call());
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
                result = attempt => result,
            };

            let error = match result {
                Ok(Ok(outcome)) => return Ok(outcome),
                Ok(Err(error)) => error,
                Err(_) => TaskError::new(
                    ErrorKind::TimeoutError,
                    format!("{} phase timed out after {:?}", phase, self.settings.phase_timeout),
                ),
            };

            if error.kind.is_retryable() && retries < self.settings.max_retries {
                retries += 1;
                warn!(
                    task_id = %task.id.short(),
                    %phase,
                    retry = retries,
                    error = %error,
                    "Phase step failed, retrying"
                );
                continue;
            }
            return Err(Interrupt::Failed(error.with_retries(retries)));
        }
    }

    /// Apply `step` to every resource in order. Retries stay on the failing
    /// resource; resources already handled are not visited again.
    async fn for_each_resource<'a, F, Fut>(
        &self,
        phase: Phase,
        task: &'a WorkflowTask,
        cancel: &CancellationToken,
        step: F,
    ) -> std::result::Result<StepOutcome, Interrupt>
    where
        F: Fn(&'a str) -> Fut,
        Fut: Future<Output = StepResult>,
    {
        let mut lines = Vec::with_capacity(task.resources.len());
        let mut artifacts = Vec::new();
        for resource in &task.resources {
            let outcome = self
                .with_retries(phase, task, cancel, || step(resource.as_str()))
                .await?;
            lines.push(outcome.output);
            artifacts.extend(outcome.artifact);
        }
        let mut combined = StepOutcome::new(lines.join("; "));
        if !artifacts.is_empty() {
            combined = combined.with_artifact(artifacts.join(","));
        }
        Ok(combined)
    }

    async fn record_phase(
        &self,
        id: &CollaborationId,
        task: &WorkflowTask,
        phase: Phase,
        outcome: &StepOutcome,
        progress: f64,
    ) -> std::result::Result<(), TaskError> {
        let line = format!("{}: {}", phase, outcome.output);
        {
            let mut state = self.workflow.write().await;
            let collab = state.active_collaboration_mut(id).ok_or_else(|| {
                TaskError::new(
                    ErrorKind::SystemError,
                    format!("collaboration {} vanished", id.short()),
                )
            })?;
            collab.advance(progress, line.clone());
        }
        debug!(collaboration = %id.short(), %phase, progress, "Phase finished");

        if let Some(linked) = task.linked_task {
            let output = match &outcome.artifact {
                Some(artifact) => json!({ "output": outcome.output, "artifact": artifact }),
                None => json!({ "output": outcome.output }),
            };
            self.store
                .write()
                .await
                .add_tool_execution(&linked, &phase.to_string(), output);
        }

        self.emit(OrchestratorEvent::Progress {
            collaboration: *id,
            progress,
            line,
        });
        Ok(())
    }

    async fn complete(&self, id: &CollaborationId, task: &WorkflowTask) -> ExecutionOutcome {
        let done = {
            let mut state = self.workflow.write().await;
            state.complete_collaboration(id)
        };
        let collab = match done {
            Ok(collab) => collab,
            Err(e) => {
                warn!(collaboration = %id.short(), error = %e, "Could not complete collaboration");
                return ExecutionOutcome::Failed(TaskError::new(
                    ErrorKind::SystemError,
                    e.to_string(),
                ));
            }
        };
        info!(collaboration = %id.short(), kind = %task.kind, "Collaboration completed");

        if let Some(linked) = task.linked_task {
            let mut outputs = Payload::new();
            outputs.insert("collaboration".to_string(), json!(id.to_string()));
            outputs.insert("log".to_string(), json!(collab.outputs));
            self.store
                .write()
                .await
                .update_task_status(&linked, TaskStatus::Completed, Some(outputs), None);
        }

        self.emit(OrchestratorEvent::CollaborationCompleted {
            collaboration: *id,
            task_id: task.id,
        });
        ExecutionOutcome::Completed
    }

    async fn fail(
        &self,
        id: &CollaborationId,
        task: &WorkflowTask,
        error: TaskError,
    ) -> ExecutionOutcome {
        let failed = {
            let mut state = self.workflow.write().await;
            state.fail_collaboration(id, error.clone())
        };
        if let Err(e) = failed {
            warn!(collaboration = %id.short(), error = %e, "Could not mark collaboration failed");
        }
        warn!(
            collaboration = %id.short(),
            kind = %task.kind,
            error = %error,
            "Collaboration failed"
        );

        if let Some(linked) = task.linked_task {
            self.store.write().await.update_task_status(
                &linked,
                TaskStatus::Failed,
                None,
                Some(error.clone()),
            );
        }

        self.emit(OrchestratorEvent::CollaborationFailed {
            collaboration: *id,
            task_id: task.id,
            error: error.to_string(),
        });
        ExecutionOutcome::Failed(error)
    }

    async fn pause(&self, id: &CollaborationId, task: &WorkflowTask) -> ExecutionOutcome {
        let paused = {
            let mut state = self.workflow.write().await;
            state.pause_collaboration(id)
        };
        if let Err(e) = paused {
            warn!(collaboration = %id.short(), error = %e, "Could not pause collaboration");
        }
        info!(collaboration = %id.short(), "Collaboration paused by cancellation");

        if let Some(linked) = task.linked_task {
            self.store
                .write()
                .await
                .update_task_status(&linked, TaskStatus::Paused, None, None);
        }

        self.emit(OrchestratorEvent::CollaborationPaused {
            collaboration: *id,
            task_id: task.id,
        });
        ExecutionOutcome::Paused
    }
}
