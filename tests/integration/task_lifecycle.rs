//! Task store integration tests.
//!
//! These tests exercise the store through longer sequences of operations
//! than the unit tests: decomposition trees, dependency chains, history
//! eviction and the change channel.

use tokio::sync::mpsc;

use taskgraph::core::{
    ErrorKind, TaskError, TaskEvent, TaskPriority, TaskQuery, TaskStatus, TaskStore, TaskType,
};
use taskgraph::Error;

use crate::fixtures::{create, task_node};

/// Test: Dependency chain executes in order
/// Given a -> b -> c where c has the highest priority
/// When tasks are drained with get_next_pending_task
/// Then they run a, b, c regardless of priority
#[test]
fn test_dependency_chain_runs_in_order() {
    let mut store = TaskStore::default();
    let a = create(&mut store, "a", TaskPriority::Low);
    let b = create(&mut store, "b", TaskPriority::Normal);
    let c = create(&mut store, "c", TaskPriority::Critical);
    store.add_dependency(&b.id, &a.id).unwrap();
    store.add_dependency(&c.id, &b.id).unwrap();

    let mut order = Vec::new();
    while let Some(next) = store.get_next_pending_task() {
        order.push(next.title.clone());
        store.update_task_status(&next.id, TaskStatus::InProgress, None, None);
        store.update_task_status(&next.id, TaskStatus::Completed, None, None);
    }
    assert_eq!(order, vec!["a", "b", "c"]);
    assert_eq!(store.active_count(), 0);
}

/// Test: Cycles are rejected
/// Given a -> b
/// When b -> a is added
/// Then a validation error is returned and the graph is unchanged
#[test]
fn test_dependency_cycle_rejected() {
    let mut store = TaskStore::default();
    let a = create(&mut store, "a", TaskPriority::Normal);
    let b = create(&mut store, "b", TaskPriority::Normal);
    store.add_dependency(&b.id, &a.id).unwrap();

    let err = store.add_dependency(&a.id, &b.id).unwrap_err();
    assert!(matches!(err, Error::Validation(ref msg) if msg.contains("cycle")));
    assert!(store.get_task(&a.id).unwrap().dependencies.is_empty());
    assert_eq!(store.get_next_pending_task().unwrap().id, a.id);
}

/// Test: Failed dependency blocks dependents
/// Given b depends on a
/// When a fails
/// Then b is never selected
#[test]
fn test_failed_dependency_blocks_dependent() {
    let mut store = TaskStore::default();
    let a = create(&mut store, "a", TaskPriority::Normal);
    let b = create(&mut store, "b", TaskPriority::High);
    store.add_dependency(&b.id, &a.id).unwrap();

    let error = TaskError::new(ErrorKind::ToolError, "compiler crashed");
    store.update_task_status(&a.id, TaskStatus::Failed, None, Some(error));

    assert!(store.get_next_pending_task().is_none());
    let context = store.get_current_task_context();
    assert_eq!(context.recent_errors.len(), 1);
    assert_eq!(context.recent_errors[0].kind, ErrorKind::ToolError);
}

/// Test: Three-level decomposition
/// Given root -> {mid -> {leaf1, leaf2}, side}
/// When every leaf and side complete
/// Then mid and root complete automatically, with completed_at set once
#[test]
fn test_three_level_completion_cascade() {
    let mut store = TaskStore::default();
    let root = create(&mut store, "root", TaskPriority::High);
    let mid = task_node("mid", TaskPriority::Normal);
    let side = task_node("side", TaskPriority::Normal);
    let (mid_id, side_id) = (mid.id, side.id);
    store.decompose_task(&root.id, vec![mid, side]).unwrap();

    let leaf1 = task_node("leaf1", TaskPriority::Normal);
    let leaf2 = task_node("leaf2", TaskPriority::Normal);
    let (leaf1_id, leaf2_id) = (leaf1.id, leaf2.id);
    let decomposed = store.decompose_task(&mid_id, vec![leaf1, leaf2]).unwrap();
    assert_eq!(decomposed.task_type, TaskType::GoalDecomposition);
    assert_eq!(decomposed.metadata.subtask_count, Some(2));

    store.update_task_status(&leaf1_id, TaskStatus::Completed, None, None);
    store.update_task_status(&side_id, TaskStatus::Completed, None, None);
    assert_eq!(store.get_task(&mid_id).unwrap().status, TaskStatus::Pending);

    store.update_task_status(&leaf2_id, TaskStatus::Completed, None, None);
    let mid = store.get_task(&mid_id).unwrap();
    let root = store.get_task(&root.id).unwrap();
    assert_eq!(mid.status, TaskStatus::Completed);
    assert_eq!(root.status, TaskStatus::Completed);
    assert!(root.completed_at.is_some());

    // a terminal task ignores further updates
    let completed_at = root.completed_at;
    let again = store
        .update_task_status(&root.id, TaskStatus::Failed, None, None)
        .unwrap();
    assert_eq!(again.status, TaskStatus::Completed);
    assert_eq!(again.completed_at, completed_at);
    assert_eq!(store.active_count(), 0);
}

/// Test: History keeps the most recent entries
/// Given a history limit of 100
/// When 150 tasks complete
/// Then only the newest 100 remain searchable
#[test]
fn test_history_eviction_keeps_newest() {
    let mut store = TaskStore::with_history_limit(100);
    let mut ids = Vec::new();
    for i in 0..150 {
        let node = create(&mut store, &format!("job-{}", i), TaskPriority::Normal);
        store.update_task_status(&node.id, TaskStatus::Completed, None, None);
        ids.push(node.id);
    }

    assert_eq!(store.history_len(), 100);
    assert!(store.get_task(&ids[49]).is_none());
    assert!(store.get_task(&ids[50]).is_some());

    let stats = store.get_task_statistics();
    assert_eq!(stats.total, 100);
    assert_eq!(stats.success_rate, 1.0);

    let newest = store.search_tasks(&TaskQuery::default().text("job-"));
    assert_eq!(newest.len(), 100);
    assert_eq!(newest[0].title, "job-149");
}

/// Test: Search filters combine
#[test]
fn test_search_combines_filters() {
    let mut store = TaskStore::default();
    create(&mut store, "Index documents", TaskPriority::High);
    let b = create(&mut store, "Index images", TaskPriority::Low);
    create(&mut store, "Summarize", TaskPriority::High);
    store.update_task_status(&b.id, TaskStatus::InProgress, None, None);

    let high = store.search_tasks(&TaskQuery::default().text("index").priority(TaskPriority::High));
    assert_eq!(high.len(), 1);
    assert_eq!(high[0].title, "Index documents");

    let running = store.search_tasks(&TaskQuery::default().status(TaskStatus::InProgress));
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, b.id);

    assert!(store
        .search_tasks(&TaskQuery::default().task_type(TaskType::Learning))
        .is_empty());
}

/// Test: Tool usage statistics
#[test]
fn test_tool_usage_statistics() {
    let mut store = TaskStore::default();
    let a = create(&mut store, "a", TaskPriority::Normal);
    let b = create(&mut store, "b", TaskPriority::Normal);
    store.add_tool_execution(&a.id, "grep", serde_json::json!("3 matches"));
    store.add_tool_execution(&b.id, "grep", serde_json::json!("0 matches"));
    store.add_tool_execution(&b.id, "sed", serde_json::json!("ok"));
    store.update_task_status(&a.id, TaskStatus::Completed, None, None);
    store.update_task_status(&b.id, TaskStatus::Failed, None, None);

    let stats = store.get_task_statistics();
    assert_eq!(stats.top_tools[0].tool, "grep");
    assert_eq!(stats.top_tools[0].count, 2);
    assert_eq!(stats.top_tools[1].tool, "sed");
    assert_eq!(stats.success_rate, 0.5);
    assert_eq!(store.get_task(&a.id).unwrap().outputs["grep"], "3 matches");
}

/// Test: Cleanup purges only old history
#[test]
fn test_cleanup_purges_old_history() {
    let mut store = TaskStore::default();
    let old = create(&mut store, "old", TaskPriority::Normal);
    store.update_task_status(&old.id, TaskStatus::Completed, None, None);
    let pending = create(&mut store, "pending", TaskPriority::Normal);

    // everything finished before now is older than a zero max age
    std::thread::sleep(std::time::Duration::from_millis(5));
    let purged = store.cleanup_old_tasks(chrono::Duration::zero());
    assert_eq!(purged, 1);
    assert!(store.get_task(&old.id).is_none());
    assert!(store.get_task(&pending.id).is_some());
}

/// Test: Change channel
/// Given a store with an event channel
/// When a decomposed tree completes
/// Then Created, Decomposed, StatusChanged and AutoCompleted events arrive
#[test]
fn test_store_events() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut store = TaskStore::default().with_events(tx);
    let root = create(&mut store, "root", TaskPriority::Normal);
    let child = task_node("child", TaskPriority::Normal);
    let child_id = child.id;
    store.decompose_task(&root.id, vec![child]).unwrap();
    store.update_task_status(&child_id, TaskStatus::Completed, None, None);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events[0], TaskEvent::Created { task_id } if task_id == root.id));
    assert!(events
        .iter()
        .any(|e| matches!(e, TaskEvent::Decomposed { parent_id, .. } if *parent_id == root.id)));
    assert!(events
        .iter()
        .any(|e| matches!(e, TaskEvent::AutoCompleted { task_id } if *task_id == root.id)));
}
