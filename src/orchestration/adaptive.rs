//! Adaptive task generation.
//!
//! Each tick the orchestrator scans the resource catalog and the living
//! instance registry and queues maintenance work:
//!
//! - untransformed resource: `resource_transformation`
//! - stale living instance: `living_optimization`
//! - UI-flagged resource without customization: `ui_customization`
//!
//! A candidate is skipped when a queued or running task of the same kind
//! already targets the same resource, so repeated ticks do not pile up
//! duplicates.

use chrono::{DateTime, Utc};

use crate::config::AdaptiveConfig;
use crate::workflow::{WorkflowPriority, WorkflowState, WorkflowTask, WorkflowTaskKind};

use super::catalog::{LivingInstance, Resource};

/// Build the adaptive tasks that are not already queued or running.
pub fn generate(
    state: &WorkflowState,
    resources: &[Resource],
    instances: &[LivingInstance],
    config: &AdaptiveConfig,
    now: DateTime<Utc>,
) -> Vec<WorkflowTask> {
    let mut generated: Vec<WorkflowTask> = Vec::new();
    let mut push = |task: WorkflowTask, target: &str| {
        let duplicate = state.is_targeted(&task.kind, target)
            || generated.iter().any(|t| t.targets(&task.kind, target));
        if !duplicate {
            generated.push(task);
        }
    };

    for resource in resources.iter().filter(|r| !r.transformed) {
        push(
            WorkflowTask::new(
                WorkflowTaskKind::ResourceTransformation,
                &format!("Transform {}", resource.path),
            )
                .with_agent_ids(config.transform_agents.clone())
                .with_resources(&[&resource.path])
                .with_priority(WorkflowPriority::Medium)
                .with_outcome("living instance"),
            &resource.path,
        );
    }

    for instance in instances
        .iter()
        .filter(|i| i.is_stale(now, config.stale_after(), config.metric_floor))
    {
        push(
            WorkflowTask::new(
                WorkflowTaskKind::LivingOptimization,
                &format!("Optimize {}", instance.id),
            )
                .with_agent_ids(config.optimize_agents.clone())
                .with_resources(&[&instance.id])
                .with_priority(WorkflowPriority::High)
                .with_outcome("refreshed metrics"),
            &instance.id,
        );
    }

    for resource in resources
        .iter()
        .filter(|r| r.ui_flagged && !r.has_customization)
    {
        push(
            WorkflowTask::new(
                WorkflowTaskKind::UiCustomization,
                &format!("Customize UI for {}", resource.path),
            )
                .with_agent_ids(config.ui_agents.clone())
                .with_resources(&[&resource.path])
                .with_priority(WorkflowPriority::Low)
                .with_outcome("customized interface"),
            &resource.path,
        );
    }

    generated
}
