//! Cancellation, resume, timeout and retry integration tests.
//!
//! These tests verify that collaborations stop cleanly when cancelled,
//! can be requeued, and that stalled or flaky collaborators are handled
//! by the phase timeout and bounded retries.

use std::sync::Arc;
use std::time::Duration;

use taskgraph::agent::AgentId;
use taskgraph::core::{ErrorKind, TaskPriority, TaskStatus};
use taskgraph::orchestration::InMemoryCatalog;
use taskgraph::workflow::{CollaborationStatus, WorkflowTask};

use crate::fixtures::{
    create, fast_config, slow_config, task_node, FlakyCollaborator, OrchestratorHarness,
    StallOnceCollaborator, StuckCollaborator,
};

fn long_job() -> WorkflowTask {
    WorkflowTask::new("archive_shell", "archive old sessions")
        .with_agents(&["scanner", "validator"])
}

/// Test: Cancel then resume
/// Given a running collaboration
/// When it is cancelled
/// Then it is Paused, its agents are idle and its linked task Paused;
/// resuming requeues the task, the linked task returns to Pending and the
/// next tick admits a fresh collaboration
#[tokio::test]
async fn test_cancel_then_resume() {
    let harness = OrchestratorHarness::new(&slow_config());
    let node = harness.queue_linked(long_job(), "archive").await;
    harness.orchestrator.tick().await.unwrap();

    let first = harness.orchestrator.snapshot().await.active[0].clone();
    harness.orchestrator.cancel_collaboration(&first.id).await.unwrap();

    let snapshot = harness.orchestrator.snapshot().await;
    assert!(snapshot.active.is_empty());
    assert_eq!(snapshot.paused[0].status, CollaborationStatus::Paused);
    let statuses = harness.orchestrator.agent_statuses().await;
    assert_eq!(statuses[&AgentId::from("scanner")], "idle");
    assert_eq!(
        harness.store.read().await.get_task(&node.id).unwrap().status,
        TaskStatus::Paused
    );

    // paused collaborations still show up for their agents
    let collabs = harness
        .orchestrator
        .agent_collaborations(&AgentId::from("validator"))
        .await;
    assert_eq!(collabs.len(), 1);

    let task_id = harness.orchestrator.resume_collaboration(&first.id).await.unwrap();
    assert_eq!(task_id, first.task.id);
    assert!(harness.orchestrator.snapshot().await.paused.is_empty());
    assert!(harness.orchestrator.resume_collaboration(&first.id).await.is_err());
    assert_eq!(
        harness.store.read().await.get_task(&node.id).unwrap().status,
        TaskStatus::Pending
    );

    let report = harness.orchestrator.tick().await.unwrap();
    assert_eq!(report.admitted, 1);
    let second = harness.orchestrator.snapshot().await.active[0].clone();
    assert_ne!(second.id, first.id);
    assert_eq!(second.task.id, first.task.id);
    assert_eq!(
        harness.store.read().await.get_task(&node.id).unwrap().status,
        TaskStatus::InProgress
    );

    harness.orchestrator.stop().await;
    assert_eq!(
        harness.store.read().await.get_task(&node.id).unwrap().status,
        TaskStatus::Cancelled
    );
}

/// Test: A resumed subtask still completes its parent
/// Given a validation task linked to one subtask of a decomposed parent
/// When its collaboration is cancelled, resumed and then runs to the end
/// Then the subtask ends Completed and the parent auto-completes
#[tokio::test]
async fn test_resumed_subtask_completes_parent() {
    let harness = OrchestratorHarness::with_collaborator(
        &fast_config(),
        Arc::new(InMemoryCatalog::new()),
        Arc::new(StallOnceCollaborator::default()),
    );
    let (parent, child) = {
        let mut store = harness.store.write().await;
        let parent = create(&mut store, "release", TaskPriority::High);
        let child = task_node("verify build", TaskPriority::Normal);
        let child_id = child.id;
        store.decompose_task(&parent.id, vec![child]).unwrap();
        (parent.id, child_id)
    };
    harness
        .orchestrator
        .queue_task(
            WorkflowTask::new("validation", "verify build")
                .with_agents(&["validator"])
                .linked_to(child),
        )
        .await;

    harness.orchestrator.tick().await.unwrap();
    let first = harness.orchestrator.snapshot().await.active[0].id;
    harness.orchestrator.cancel_collaboration(&first).await.unwrap();
    harness.orchestrator.resume_collaboration(&first).await.unwrap();
    harness.orchestrator.tick().await.unwrap();

    let child = harness.wait_task(&child, TaskStatus::Completed).await;
    assert_eq!(child.tools_used, vec!["validate"]);
    let parent = harness.store.read().await.get_task(&parent).unwrap();
    assert_eq!(parent.status, TaskStatus::Completed);
    assert_eq!(harness.orchestrator.system_metrics().await.completed, 1);
}

/// Test: Graceful shutdown
/// Given a spawned orchestrator loop with running collaborations
/// When the handle is shut down
/// Then every running collaboration ends Paused and no agent stays busy
#[tokio::test]
async fn test_shutdown_pauses_running_collaborations() {
    let harness = OrchestratorHarness::new(&slow_config());
    harness.orchestrator.queue_task(long_job()).await;
    harness
        .orchestrator
        .queue_task(WorkflowTask::new("index", "reindex").with_agents(&["optimizer"]))
        .await;

    let handle = harness.orchestrator.spawn();
    for _ in 0..400 {
        if harness.orchestrator.system_metrics().await.active == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(harness.orchestrator.system_metrics().await.active, 2);

    handle.shutdown();
    handle.join().await;

    let snapshot = harness.orchestrator.snapshot().await;
    assert_eq!(snapshot.paused.len(), 2);
    assert_eq!(harness.orchestrator.system_metrics().await.active_agent_count, 0);
}

/// Test: Phase timeout
/// Given a collaborator that never answers
/// When the phase timeout elapses on every attempt
/// Then the collaboration fails with a TimeoutError carrying its retries
#[tokio::test]
async fn test_phase_timeout_fails_collaboration() {
    let mut config = fast_config();
    config.scheduler.phase_timeout_ms = 30;
    config.scheduler.max_retries = 1;
    let harness = OrchestratorHarness::with_collaborator(
        &config,
        Arc::new(InMemoryCatalog::new()),
        Arc::new(StuckCollaborator),
    );
    let node = harness
        .queue_linked(WorkflowTask::new("validation", "check").with_agents(&["validator"]), "check")
        .await;
    harness.orchestrator.tick().await.unwrap();

    let node = harness.wait_task(&node.id, TaskStatus::Failed).await;
    assert_eq!(node.errors[0].kind, ErrorKind::TimeoutError);
    assert_eq!(node.errors[0].retry_count, 1);
    assert!(node.errors[0].recoverable);

    harness.wait_idle().await;
    let statuses = harness.orchestrator.agent_statuses().await;
    assert_eq!(statuses[&AgentId::from("validator")], "idle - task failed");
}

/// Test: Retry recovers from transient tool errors
/// Given a collaborator that fails twice with a ToolError
/// When max_retries is 2
/// Then the third attempt succeeds and the linked task completes
#[tokio::test]
async fn test_retry_recovers_transient_failure() {
    let collaborator = Arc::new(FlakyCollaborator::new(2));
    let harness = OrchestratorHarness::with_collaborator(
        &fast_config(),
        Arc::new(InMemoryCatalog::new()),
        collaborator.clone(),
    );
    let node = harness
        .queue_linked(WorkflowTask::new("validation", "check").with_agents(&["validator"]), "check")
        .await;
    harness.orchestrator.tick().await.unwrap();

    let node = harness.wait_task(&node.id, TaskStatus::Completed).await;
    assert_eq!(collaborator.calls(), 3);
    assert!(node.errors.is_empty());
    assert_eq!(node.outputs["validate"]["output"], "validate ok");
}

/// Test: Retries are bounded
/// Given a collaborator that fails three times
/// When max_retries is 2
/// Then the collaboration fails after three attempts
#[tokio::test]
async fn test_retries_are_bounded() {
    let collaborator = Arc::new(FlakyCollaborator::new(3));
    let harness = OrchestratorHarness::with_collaborator(
        &fast_config(),
        Arc::new(InMemoryCatalog::new()),
        collaborator.clone(),
    );
    let node = harness
        .queue_linked(WorkflowTask::new("validation", "check").with_agents(&["validator"]), "check")
        .await;
    harness.orchestrator.tick().await.unwrap();

    let node = harness.wait_task(&node.id, TaskStatus::Failed).await;
    assert_eq!(collaborator.calls(), 3);
    assert_eq!(node.errors[0].kind, ErrorKind::ToolError);
    assert_eq!(node.errors[0].retry_count, 2);
}
