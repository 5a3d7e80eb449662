//! Plan file and configuration file integration tests.

use std::fs;

use tempfile::TempDir;

use taskgraph::config::Config;
use taskgraph::core::{TaskStatus, TaskStore, TaskType};
use taskgraph::plan::Plan;
use taskgraph::Error;

const RESEARCH_PLAN: &str = r#"
[[tasks]]
key = "report"
title = "Write market report"
type = "user_request"
priority = "high"

[[tasks]]
key = "collect"
title = "Collect sources"
parent = "report"
tools = ["web_search", "web_search", "fetch"]

[[tasks]]
key = "analyze"
title = "Analyze sources"
parent = "report"
depends_on = ["collect"]
tools = ["python"]

[[tasks]]
key = "draft"
title = "Draft report"
parent = "report"
priority = "critical"
depends_on = ["analyze"]

[[tasks]]
key = "retro"
title = "Retrospective"
type = "reflection"
priority = "low"
depends_on = ["report"]
"#;

/// Test: Plan file end to end
/// Given a plan with a decomposed parent and a dependent follow-up
/// When it is loaded and driven
/// Then subtasks run in dependency order, the parent auto-completes and
/// the follow-up runs last
#[test]
fn test_plan_file_runs_to_completion() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plan.toml");
    fs::write(&path, RESEARCH_PLAN).unwrap();

    let plan = Plan::load(&path).unwrap();
    let mut store = TaskStore::default();
    let report = plan.drive(&mut store).unwrap();

    assert_eq!(
        report.execution_order,
        vec!["report", "collect", "analyze", "draft", "retro"]
    );
    let pos = |key: &str| report.dependency_order.iter().position(|k| k == key).unwrap();
    assert_eq!(report.dependency_order.len(), 5);
    assert!(pos("collect") < pos("analyze"));
    assert!(pos("analyze") < pos("draft"));
    assert!(pos("report") < pos("retro"));
    let stats = &report.statistics;
    assert_eq!(stats.total, 5);
    assert_eq!(stats.count_status(TaskStatus::Completed), 5);
    assert_eq!(stats.success_rate, 1.0);
    assert_eq!(stats.by_type[&TaskType::GoalDecomposition], 1);
    assert_eq!(stats.top_tools[0].tool, "web_search");
    assert_eq!(stats.top_tools[0].count, 2);
}

/// Test: Invalid plan files are rejected
#[test]
fn test_plan_file_errors() {
    let dir = TempDir::new().unwrap();

    let missing = dir.path().join("missing.toml");
    assert!(matches!(Plan::load(&missing), Err(Error::Io(_))));

    let malformed = dir.path().join("malformed.toml");
    fs::write(&malformed, "[[tasks]]\nkey = ").unwrap();
    assert!(matches!(Plan::load(&malformed), Err(Error::TomlParse(_))));

    let dangling = dir.path().join("dangling.toml");
    fs::write(
        &dangling,
        "[[tasks]]\nkey = \"a\"\ntitle = \"A\"\ndepends_on = [\"ghost\"]\n",
    )
    .unwrap();
    assert!(matches!(Plan::load(&dangling), Err(Error::Validation(_))));
}

/// Test: Configuration file
/// Given a config file overriding a few scheduler and store settings
/// When it is loaded
/// Then overrides apply, other sections keep their defaults and saving
/// then reloading yields the same configuration
#[test]
fn test_config_file_overrides_and_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("taskgraph.toml");
    fs::write(
        &path,
        "[scheduler]\nmax_concurrent = 8\nload_ceiling = 0.5\n\n[store]\nhistory_limit = 10\n",
    )
    .unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.scheduler.max_concurrent, 8);
    assert_eq!(config.scheduler.load_ceiling, 0.5);
    assert_eq!(config.store.history_limit, 10);
    assert_eq!(config.scheduler.tick_interval_ms, 5000);
    assert_eq!(config.agents.len(), 5);

    let saved = dir.path().join("nested").join("saved.toml");
    config.save_to(&saved).unwrap();
    assert_eq!(Config::load_from(&saved).unwrap(), config);

    fs::write(&path, "[scheduler]\nmax_concurrent = 0\n").unwrap();
    assert!(matches!(Config::load_from(&path), Err(Error::Validation(_))));
}
