//! End-to-end orchestration tests.
//!
//! These tests run real executors against the in-memory catalog and verify
//! admission limits, agent status strings, linked task updates and the
//! adaptive generation loop.

use std::time::Duration;

use taskgraph::agent::AgentId;
use taskgraph::core::{ErrorKind, TaskStatus, TaskType};
use taskgraph::orchestration::{OrchestratorEvent, Resource};
use taskgraph::workflow::{WorkflowPriority, WorkflowTask, WorkflowTaskKind};

use crate::fixtures::{fast_config, slow_config, OrchestratorHarness};

fn transformation(resource: &str) -> WorkflowTask {
    WorkflowTask::new(WorkflowTaskKind::ResourceTransformation, &format!("Transform {}", resource))
        .with_agents(&["scanner", "adapter"])
        .with_resources(&[resource])
        .with_outcome("living instance")
}

/// Test: Resource transformation scenario
/// Given a registered resource and idle scanner/adapter agents
/// When a resource_transformation task is queued and a tick runs
/// Then the collaboration completes, the resource has a living instance
/// and both agents report "idle"
#[tokio::test]
async fn test_resource_transformation_end_to_end() {
    let harness = OrchestratorHarness::new(&fast_config());
    harness.catalog.add_resource(Resource::new("lib/parser")).await;
    let node = harness.queue_linked(transformation("lib/parser"), "transform parser").await;

    let report = harness.orchestrator.tick().await.unwrap();
    assert_eq!(report.admitted, 1);
    let statuses = harness.orchestrator.agent_statuses().await;
    assert_eq!(statuses[&AgentId::from("scanner")], "busy on resource_transformation");

    let node = harness.wait_task(&node.id, TaskStatus::Completed).await;
    harness.wait_idle().await;

    let resource = harness.catalog.resource("lib/parser").await.unwrap();
    assert!(resource.transformed);

    let snapshot = harness.orchestrator.snapshot().await;
    assert!(snapshot.active.is_empty());
    assert_eq!(snapshot.completed.len(), 1);
    let statuses = harness.orchestrator.agent_statuses().await;
    assert_eq!(statuses[&AgentId::from("scanner")], "idle");
    assert_eq!(statuses[&AgentId::from("adapter")], "idle");
    assert_eq!(statuses[&AgentId::from("designer")], "initialized");

    assert_eq!(node.tools_used, vec!["analysis", "transform", "validate"]);
    let instance = node.outputs["transform"]["artifact"].as_str().unwrap().to_string();
    assert!(harness.catalog.instance(&instance).await.is_some());
    assert_eq!(node.outputs["log"].as_array().unwrap().len(), 3);
}

/// Test: Progress events
/// Given a subscriber
/// When a three-phase collaboration runs
/// Then progress rises through 1/3, 2/3 and 1.0 before completion
#[tokio::test]
async fn test_progress_events_in_order() {
    let harness = OrchestratorHarness::new(&fast_config());
    harness.catalog.add_resource(Resource::new("themes/dark")).await;
    let mut events = harness.orchestrator.subscribe();
    harness.orchestrator.queue_task(transformation("themes/dark")).await;
    harness.orchestrator.tick().await.unwrap();

    let mut progress = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event in time")
            .expect("channel open");
        match event {
            OrchestratorEvent::Progress { progress: p, .. } => progress.push(p),
            OrchestratorEvent::CollaborationCompleted { .. } => break,
            OrchestratorEvent::CollaborationFailed { error, .. } => panic!("failed: {}", error),
            _ => {}
        }
    }
    assert_eq!(progress.len(), 3);
    assert!((progress[0] - 1.0 / 3.0).abs() < 1e-9);
    assert!((progress[1] - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(progress[2], 1.0);
}

/// Test: Admission batch and load
/// Given four queued tasks with disjoint agents and executors that stay busy
/// When ticks run
/// Then three are admitted first (load 3/5 = 0.6), the fourth next tick
/// (load 0.8), and a fifth is refused at the load ceiling
#[tokio::test]
async fn test_admission_batch_and_load_ceiling() {
    let harness = OrchestratorHarness::new(&slow_config());
    for agent in ["scanner", "adapter", "optimizer", "designer"] {
        harness
            .orchestrator
            .queue_task(WorkflowTask::new("archive_shell", agent).with_agents(&[agent]))
            .await;
    }

    let first = harness.orchestrator.tick().await.unwrap();
    assert_eq!(first.admitted, 3);
    assert!((first.system_load - 0.6).abs() < 1e-9);

    let second = harness.orchestrator.tick().await.unwrap();
    assert_eq!(second.admitted, 1);
    assert!((second.system_load - 0.8).abs() < 1e-9);

    harness
        .orchestrator
        .queue_task(WorkflowTask::new("validation", "late").with_agents(&["validator"]))
        .await;
    let third = harness.orchestrator.tick().await.unwrap();
    assert_eq!(third.admitted, 0);

    let metrics = harness.orchestrator.system_metrics().await;
    assert_eq!(metrics.active, 4);
    assert_eq!(metrics.queued, 1);
    assert_eq!(metrics.active_agent_count, 4);
    assert_eq!(metrics.agent_count, 5);

    harness.orchestrator.stop().await;
    let snapshot = harness.orchestrator.snapshot().await;
    assert_eq!(snapshot.paused.len(), 4);
}

/// Test: Priority order within a batch
/// Given two queued tasks needing the same agent
/// When a tick runs
/// Then the higher priority task is admitted even though it was queued later
#[tokio::test]
async fn test_higher_priority_admitted_first() {
    let harness = OrchestratorHarness::new(&slow_config());
    harness
        .orchestrator
        .queue_task(WorkflowTask::new("validation", "routine").with_agents(&["validator"]))
        .await;
    let urgent = harness
        .orchestrator
        .queue_task(
            WorkflowTask::new("validation", "urgent")
                .with_agents(&["validator"])
                .with_priority(WorkflowPriority::Critical),
        )
        .await;

    harness.orchestrator.tick().await.unwrap();
    let collabs = harness
        .orchestrator
        .agent_collaborations(&AgentId::from("validator"))
        .await;
    assert_eq!(collabs.len(), 1);
    assert_eq!(collabs[0].task.id, urgent);
    harness.orchestrator.stop().await;
}

/// Test: Failure frees agents with a failure status
/// Given a transformation of a resource the catalog does not know
/// When it runs
/// Then the collaboration fails, the linked task fails with a DataError and
/// the agents report "idle - task failed"
#[tokio::test]
async fn test_failed_collaboration_releases_agents() {
    let harness = OrchestratorHarness::new(&fast_config());
    let node = harness.queue_linked(transformation("missing"), "transform missing").await;

    harness.orchestrator.tick().await.unwrap();
    let node = harness.wait_task(&node.id, TaskStatus::Failed).await;
    harness.wait_idle().await;

    let statuses = harness.orchestrator.agent_statuses().await;
    assert_eq!(statuses[&AgentId::from("adapter")], "idle - task failed");
    let snapshot = harness.orchestrator.snapshot().await;
    assert!(snapshot.active.is_empty());
    assert!(snapshot.queued.is_empty());
    assert!(snapshot.completed.is_empty());

    assert_eq!(node.errors.len(), 1);
    assert_eq!(node.errors[0].kind, ErrorKind::DataError);
}

/// Test: Adaptive loop
/// Given an untransformed resource flagged for UI customization
/// When the orchestrator loop runs with adaptive generation enabled
/// Then the resource is transformed, its UI customized, and the generated
/// tasks are recorded in the task store
#[tokio::test]
async fn test_adaptive_loop_transforms_and_customizes() {
    let mut config = fast_config();
    config.adaptive.enabled = true;
    let harness = OrchestratorHarness::new(&config);
    harness.catalog.add_resource(Resource::new("ui/panel").with_ui()).await;

    let handle = harness.orchestrator.spawn();
    let mut completed = 0;
    for _ in 0..400 {
        completed = harness
            .store
            .read()
            .await
            .get_task_statistics()
            .count_status(TaskStatus::Completed);
        if completed >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.shutdown();
    handle.join().await;
    assert!(completed >= 2, "adaptive work did not finish");

    let resource = harness.catalog.resource("ui/panel").await.unwrap();
    assert!(resource.transformed);
    assert!(resource.has_customization);
    let stats = harness.store.read().await.get_task_statistics();
    assert_eq!(stats.count_status(TaskStatus::Failed), 0);
    assert_eq!(stats.by_type[&TaskType::SystemOperation], stats.total);
}

/// Test: Load drops when collaborations finish
/// Given three single-agent collaborations admitted in one tick
/// When they all complete before the next tick
/// Then system load is already 0.0 and the next tick can admit at once
#[tokio::test]
async fn test_load_released_between_ticks() {
    let harness = OrchestratorHarness::new(&fast_config());
    for agent in ["validator", "scanner", "optimizer"] {
        harness
            .orchestrator
            .queue_task(WorkflowTask::new("validation", agent).with_agents(&[agent]))
            .await;
    }
    let report = harness.orchestrator.tick().await.unwrap();
    assert_eq!(report.admitted, 3);

    harness.wait_idle().await;
    let metrics = harness.orchestrator.system_metrics().await;
    assert_eq!(metrics.active, 0);
    assert_eq!(metrics.completed, 3);
    assert_eq!(metrics.system_load, 0.0);
}
