//! Orchestrator loop.
//!
//! The [`Orchestrator`] owns the workflow state and runs a recurring tick:
//!
//! 1. admission of queued tasks, spawning one executor per admission
//! 2. progress pass, touching `last_update` of running collaborations
//! 3. adaptive task generation from the resource catalog and registry
//! 4. system load recomputation
//!
//! A failed tick is logged and the next one is delayed by the error
//! backoff instead of the regular interval.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use taskgraph::{Config, TaskStore};
//! use taskgraph::orchestration::{InMemoryCatalog, Orchestrator};
//!
//! let catalog = Arc::new(InMemoryCatalog::new());
//! let store = TaskStore::default().into_shared();
//! let orchestrator = Orchestrator::in_memory(&Config::default(), store, catalog)?;
//! let handle = orchestrator.spawn();
//! // ...
//! handle.shutdown();
//! handle.join().await;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::{AgentId, AgentRegistry};
use crate::config::{AdaptiveConfig, Config, SchedulerConfig};
use crate::core::store::SharedTaskStore;
use crate::core::task::{Payload, TaskContext, TaskPriority, TaskStatus, TaskType};
use crate::error::{Error, Result};
use crate::util::try_with_timeout;
use crate::workflow::{
    AgentCollaboration, CollaborationId, WorkflowPriority, WorkflowState, WorkflowTask,
    WorkflowTaskId, WorkflowTaskKind,
};

use super::adaptive;
use super::admission::{self, AdmissionPolicy};
use super::catalog::{InMemoryCatalog, LivingInstanceRegistry, ResourceCatalog};
use super::collaborator::{Collaborator, SimulatedCollaborator};
use super::executor::{ExecutionOutcome, Executor, ExecutorSettings};

const EVENT_CAPACITY: usize = 256;

/// Events broadcast by the orchestrator and its executors.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    TaskQueued {
        task_id: WorkflowTaskId,
        kind: WorkflowTaskKind,
    },
    CollaborationStarted {
        collaboration: CollaborationId,
        task_id: WorkflowTaskId,
    },
    Progress {
        collaboration: CollaborationId,
        progress: f64,
        line: String,
    },
    CollaborationCompleted {
        collaboration: CollaborationId,
        task_id: WorkflowTaskId,
    },
    CollaborationFailed {
        collaboration: CollaborationId,
        task_id: WorkflowTaskId,
        error: String,
    },
    CollaborationPaused {
        collaboration: CollaborationId,
        task_id: WorkflowTaskId,
    },
    TickCompleted(TickReport),
    TickFailed {
        error: String,
    },
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub admitted: usize,
    pub generated: usize,
    pub system_load: f64,
}

/// Point-in-time orchestrator metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMetrics {
    pub active: usize,
    pub queued: usize,
    pub completed: usize,
    pub system_load: f64,
    pub agent_count: usize,
    pub active_agent_count: usize,
}

struct RunningCollaboration {
    cancel: CancellationToken,
    handle: JoinHandle<ExecutionOutcome>,
}

/// Handle to a spawned orchestrator loop, used for graceful shutdown.
pub struct OrchestratorHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl OrchestratorHandle {
    /// Signal the loop to stop after the current tick.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the loop and its executors to finish.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            error!(error = %e, "Orchestrator loop panicked");
        }
    }
}

/// Periodic scheduler of agent collaborations.
#[derive(Clone)]
pub struct Orchestrator {
    scheduler: SchedulerConfig,
    adaptive: AdaptiveConfig,
    registry: Arc<AgentRegistry>,
    workflow: Arc<RwLock<WorkflowState>>,
    store: SharedTaskStore,
    catalog: Arc<dyn ResourceCatalog>,
    instances: Arc<dyn LivingInstanceRegistry>,
    executor: Executor,
    events: broadcast::Sender<OrchestratorEvent>,
    /// Parent of every executor's cancellation token.
    shutdown: CancellationToken,
    running: Arc<Mutex<HashMap<CollaborationId, RunningCollaboration>>>,
}

impl Orchestrator {
    /// Build an orchestrator over the given store and collaborators.
    ///
    /// # Errors
    /// Returns a validation error if `config` is invalid.
    pub fn new(
        config: &Config,
        store: SharedTaskStore,
        collaborator: Arc<dyn Collaborator>,
        catalog: Arc<dyn ResourceCatalog>,
        instances: Arc<dyn LivingInstanceRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(AgentRegistry::new(config.agents.clone()));
        let workflow = Arc::new(RwLock::new(
            WorkflowState::new(registry.ids()).with_max_concurrent(config.scheduler.max_concurrent),
        ));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let executor = Executor::new(
            workflow.clone(),
            store.clone(),
            collaborator,
            ExecutorSettings::from(&config.scheduler),
            events.clone(),
        );

        info!(
            agents = registry.len(),
            max_concurrent = config.scheduler.max_concurrent,
            "Orchestrator created"
        );
        Ok(Self {
            scheduler: config.scheduler.clone(),
            adaptive: config.adaptive.clone(),
            registry,
            workflow,
            store,
            catalog,
            instances,
            executor,
            events,
            shutdown: CancellationToken::new(),
            running: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Orchestrator whose collaborator, catalog and registry are one
    /// [`InMemoryCatalog`].
    pub fn in_memory(
        config: &Config,
        store: SharedTaskStore,
        catalog: Arc<InMemoryCatalog>,
    ) -> Result<Self> {
        let collaborator = Arc::new(SimulatedCollaborator::new(catalog.clone()));
        Self::new(config, store, collaborator, catalog.clone(), catalog)
    }

    pub fn store(&self) -> SharedTaskStore {
        self.store.clone()
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.events.send(event);
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    // ========== Queue ==========

    /// Add a task to the queue. It is considered for admission next tick.
    pub async fn queue_task(&self, task: WorkflowTask) -> WorkflowTaskId {
        let id = task.id;
        let kind = task.kind.clone();
        debug!(task_id = %id.short(), %kind, "Task queued");
        self.workflow.write().await.queue(task);
        self.emit(OrchestratorEvent::TaskQueued { task_id: id, kind });
        id
    }

    // ========== Loop ==========

    /// Run one tick: admission, progress, adaptive generation, load.
    pub async fn tick(&self) -> Result<TickReport> {
        self.reap_finished().await;

        let admitted = {
            let mut state = self.workflow.write().await;
            admission::admit(&mut state, &AdmissionPolicy::from(&self.scheduler))?
        };
        for collab in &admitted {
            self.start(collab).await;
        }

        {
            let mut state = self.workflow.write().await;
            for collab in state.active.iter_mut() {
                collab.touch();
            }
        }

        let generated = if self.adaptive.enabled {
            self.generate_adaptive().await?
        } else {
            0
        };

        let system_load = self
            .workflow
            .write()
            .await
            .recompute_load(self.scheduler.max_concurrent);

        let report = TickReport {
            admitted: admitted.len(),
            generated,
            system_load,
        };
        debug!(
            admitted = report.admitted,
            generated = report.generated,
            system_load = report.system_load,
            "Tick completed"
        );
        self.emit(OrchestratorEvent::TickCompleted(report.clone()));
        Ok(report)
    }

    /// Tick until `shutdown` is cancelled, then stop every executor.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval = ?self.scheduler.tick_interval(),
            "Orchestrator loop started"
        );
        let mut delay = Duration::ZERO;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            delay = match self.tick().await {
                Ok(_) => self.scheduler.tick_interval(),
                Err(e) => {
                    error!(error = %e, "Tick failed, backing off");
                    self.emit(OrchestratorEvent::TickFailed {
                        error: e.to_string(),
                    });
                    self.scheduler.error_backoff()
                }
            };
        }
        self.stop().await;
        info!("Orchestrator loop stopped");
    }

    /// Run the loop on its own tokio task.
    pub fn spawn(&self) -> OrchestratorHandle {
        let cancel = CancellationToken::new();
        let orchestrator = self.clone();
        let token = cancel.clone();
        let join = tokio::spawn(async move { orchestrator.run(token).await });
        OrchestratorHandle { cancel, join }
    }

    async fn start(&self, collab: &AgentCollaboration) {
        if let Some(linked) = collab.task.linked_task {
            self.store
                .write()
                .await
                .update_task_status(&linked, TaskStatus::InProgress, None, None);
        }

        let cancel = self.shutdown.child_token();
        let handle = self
            .executor
            .spawn(collab.id, collab.task.clone(), cancel.clone());
        self.running
            .lock()
            .await
            .insert(collab.id, RunningCollaboration { cancel, handle });

        info!(
            collaboration = %collab.id.short(),
            kind = %collab.task.kind,
            participants = collab.participants.len(),
            "Collaboration started"
        );
        self.emit(OrchestratorEvent::CollaborationStarted {
            collaboration: collab.id,
            task_id: collab.task.id,
        });
    }

    async fn reap_finished(&self) {
        self.running
            .lock()
            .await
            .retain(|_, running| !running.handle.is_finished());
    }

    /// Wait for every running executor to finish on its own.
    pub async fn drain(&self) {
        let handles: Vec<_> = self
            .running
            .lock()
            .await
            .drain()
            .map(|(_, running)| running.handle)
            .collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Executor task panicked");
            }
        }
    }

    /// Cancel every running executor and wait for them to stop.
    ///
    /// Paused collaborations can no longer be resumed, so their linked
    /// task nodes end Cancelled.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.drain().await;

        let linked: Vec<_> = self
            .workflow
            .read()
            .await
            .paused
            .iter()
            .filter_map(|c| c.task.linked_task)
            .collect();
        if linked.is_empty() {
            return;
        }
        let mut store = self.store.write().await;
        for id in &linked {
            store.update_task_status(id, TaskStatus::Cancelled, None, None);
        }
        debug!(count = linked.len(), "Linked tasks of paused collaborations cancelled");
    }

    /// Queue adaptive maintenance work, each task linked to a new task node.
    async fn generate_adaptive(&self) -> Result<usize> {
        let deadline = self.scheduler.phase_timeout();
        let resources = try_with_timeout(deadline, self.catalog.resources()).await?;
        let instances = try_with_timeout(deadline, self.instances.instances()).await?;

        let candidates = {
            let state = self.workflow.read().await;
            adaptive::generate(&state, &resources, &instances, &self.adaptive, Utc::now())
        };
        if candidates.is_empty() {
            return Ok(0);
        }

        let mut linked = Vec::with_capacity(candidates.len());
        {
            let mut store = self.store.write().await;
            for task in candidates {
                let node = store.create_task(
                    &task.description,
                    &task.expected_outcome,
                    TaskType::SystemOperation,
                    task_priority(task.priority),
                    TaskContext::SystemOperation {
                        operation: task.kind.to_string(),
                    },
                    Payload::new(),
                );
                linked.push(task.linked_to(node.id));
            }
        }

        let count = linked.len();
        for task in linked {
            let (id, kind) = (task.id, task.kind.clone());
            self.workflow.write().await.queue(task);
            self.emit(OrchestratorEvent::TaskQueued { task_id: id, kind });
        }
        info!(count, "Adaptive tasks queued");
        Ok(count)
    }

    // ========== Control ==========

    /// Cancel a running collaboration and wait until it is Paused.
    pub async fn cancel_collaboration(&self, id: &CollaborationId) -> Result<()> {
        let running = self
            .running
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| Error::CollaborationNotFound(id.to_string()))?;
        running.cancel.cancel();
        let outcome = running
            .handle
            .await
            .map_err(|e| {
                Error::Collaborator(format!("executor for {} panicked: {}", id.short(), e))
            })?;
        debug!(collaboration = %id.short(), ?outcome, "Executor stopped");
        Ok(())
    }

    /// Requeue the task of a paused collaboration.
    pub async fn resume_collaboration(&self, id: &CollaborationId) -> Result<WorkflowTaskId> {
        let task = self.workflow.write().await.resume_collaboration(id)?;
        if let Some(linked) = task.linked_task {
            self.store
                .write()
                .await
                .update_task_status(&linked, TaskStatus::Pending, None, None);
        }
        info!(collaboration = %id.short(), task_id = %task.id.short(), "Collaboration resumed");
        self.emit(OrchestratorEvent::TaskQueued {
            task_id: task.id,
            kind: task.kind.clone(),
        });
        Ok(task.id)
    }

    // ========== Queries ==========

    /// Human-readable status per agent.
    pub async fn agent_statuses(&self) -> BTreeMap<AgentId, String> {
        self.workflow
            .read()
            .await
            .agent_statuses
            .iter()
            .map(|(id, status)| (id.clone(), status.to_string()))
            .collect()
    }

    /// Active and paused collaborations the agent takes part in.
    pub async fn agent_collaborations(&self, agent: &AgentId) -> Vec<AgentCollaboration> {
        self.workflow
            .read()
            .await
            .agent_collaborations(agent)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn system_metrics(&self) -> SystemMetrics {
        let state = self.workflow.read().await;
        SystemMetrics {
            active: state.running_count(),
            queued: state.queued.len(),
            completed: state.completed.len(),
            system_load: state.system_load,
            agent_count: self.registry.len(),
            active_agent_count: state.busy_agent_count(),
        }
    }

    /// Copy of the whole workflow state.
    pub async fn snapshot(&self) -> WorkflowState {
        self.workflow.read().await.clone()
    }
}

fn task_priority(priority: WorkflowPriority) -> TaskPriority {
    match priority {
        WorkflowPriority::Low => TaskPriority::Low,
        WorkflowPriority::Medium => TaskPriority::Normal,
        WorkflowPriority::High => TaskPriority::High,
        WorkflowPriority::Critical => TaskPriority::Critical,
    }
}
