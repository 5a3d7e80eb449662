//! Orchestration layer: admission, execution and adaptive scheduling of
//! agent collaborations.
//!
//! The [`Orchestrator`] ticks periodically; each admitted collaboration runs
//! on its own [`Executor`] task and reports back through
//! [`OrchestratorEvent`]s.

mod adaptive;
mod admission;
mod catalog;
mod collaborator;
mod executor;
mod orchestrator;

pub use adaptive::generate as generate_adaptive_tasks;
pub use admission::{admit, check, AdmissionPolicy, Refusal};
pub use catalog::{
    InMemoryCatalog, LivingInstance, LivingInstanceRegistry, Resource, ResourceCatalog,
};
pub use collaborator::{Collaborator, SimulatedCollaborator, StepOutcome, StepResult};
pub use executor::{phase_plan, ExecutionOutcome, Executor, ExecutorSettings, Phase};
pub use orchestrator::{
    Orchestrator, OrchestratorEvent, OrchestratorHandle, SystemMetrics, TickReport,
};
