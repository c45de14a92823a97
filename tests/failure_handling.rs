// tests/failure_handling.rs

mod common;
use crate::common::actions::{ActionLog, RecordingAction};
use crate::common::builders::GraphBuilder;
use crate::common::{init_tracing, with_timeout, Project};

use std::time::Duration;

use cachedag::engine::Engine;
use cachedag::errors::NodeError;
use cachedag::types::{FailurePolicy, NodeState, RunOutcome, TaskId};

fn ids(names: &[&str]) -> Vec<TaskId> {
    names.iter().map(|n| TaskId::from(*n)).collect()
}

#[tokio::test]
async fn failure_cancels_dependents_transitively() {
    init_tracing();
    let project = Project::new();
    let log = ActionLog::new();

    let graph = GraphBuilder::new()
        .action("compile", RecordingAction::new("compile", &log).fails("syntax error").boxed())
        .action("test", RecordingAction::new("test", &log).boxed())
        .action("package", RecordingAction::new("package", &log).boxed())
        .depends_on("test", "compile")
        .depends_on("package", "test")
        .build();

    let report = project.run(project.options(), graph).await;

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(report.state_of("compile"), Some(NodeState::Failed));
    assert_eq!(report.state_of("test"), Some(NodeState::Cancelled));
    assert_eq!(report.state_of("package"), Some(NodeState::Cancelled));
    assert_eq!(report.node("package").unwrap().cancelled_by, ids(&["test", "compile"]));
    assert!(!log.ran("test"));
    assert!(!log.ran("package"));

    let failure = report.node("compile").unwrap().error.as_ref().unwrap();
    assert!(format!("{:#}", failure.action_error().unwrap()).contains("syntax error"));
    let rendered = report.to_string();
    assert!(rendered.contains("> Task package CANCELLED (because of test <- compile)"), "{rendered}");
    assert!(rendered.ends_with("BUILD FAILED"));
}

#[tokio::test]
async fn must_run_after_failure_cancels_the_later_task() {
    init_tracing();
    let project = Project::new();
    let log = ActionLog::new();

    let graph = GraphBuilder::new()
        .action("migrate", RecordingAction::new("migrate", &log).fails("db down").boxed())
        .action("deploy", RecordingAction::new("deploy", &log).boxed())
        .must_run_after("deploy", "migrate")
        .build();

    let report = project.run(project.options().failure_policy(FailurePolicy::Continue), graph).await;
    assert_eq!(report.state_of("deploy"), Some(NodeState::Cancelled));
    assert!(!log.ran("deploy"));
}

#[tokio::test]
async fn should_run_after_failure_does_not_cancel() {
    init_tracing();
    let project = Project::new();
    let log = ActionLog::new();

    let graph = GraphBuilder::new()
        .action("lint", RecordingAction::new("lint", &log).fails("style").boxed())
        .action("docs", RecordingAction::new("docs", &log).boxed())
        .should_run_after("docs", "lint")
        .build();

    let report = project.run(project.options().failure_policy(FailurePolicy::Continue), graph).await;
    assert_eq!(report.state_of("docs"), Some(NodeState::Succeeded));
    assert_eq!(report.outcome, RunOutcome::Failed);
}

#[tokio::test]
async fn drain_lets_running_work_finish_but_starts_nothing_new() {
    init_tracing();
    let project = Project::new();
    let log = ActionLog::new();

    let graph = GraphBuilder::new()
        .action("slow", RecordingAction::new("slow", &log).sleep(Duration::from_millis(150)).boxed())
        .action("bad", RecordingAction::new("bad", &log).fails("boom").boxed())
        .action("later", RecordingAction::new("later", &log).boxed())
        .build();

    let options = project.options().workers(2).failure_policy(FailurePolicy::Drain);
    let report = project.run(options, graph).await;

    assert_eq!(report.state_of("slow"), Some(NodeState::Succeeded));
    assert_eq!(report.state_of("bad"), Some(NodeState::Failed));
    assert_eq!(report.state_of("later"), Some(NodeState::Cancelled));
    assert_eq!(report.node("later").unwrap().cancelled_by, ids(&["bad"]));
    assert!(!log.ran("later"));
}

#[tokio::test]
async fn continue_runs_everything_independent_of_the_failure() {
    init_tracing();
    let project = Project::new();
    let log = ActionLog::new();

    let graph = GraphBuilder::new()
        .action("bad", RecordingAction::new("bad", &log).fails("boom").boxed())
        .action("dependent", RecordingAction::new("dependent", &log).boxed())
        .action("independent", RecordingAction::new("independent", &log).boxed())
        .action("also_independent", RecordingAction::new("also_independent", &log).boxed())
        .depends_on("dependent", "bad")
        .depends_on("also_independent", "independent")
        .build();

    let options = project.options().workers(1).failure_policy(FailurePolicy::Continue);
    let report = project.run(options, graph).await;

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(report.state_of("dependent"), Some(NodeState::Cancelled));
    assert_eq!(report.state_of("independent"), Some(NodeState::Succeeded));
    assert_eq!(report.state_of("also_independent"), Some(NodeState::Succeeded));
    assert_eq!(report.failures().count(), 1);
}

#[tokio::test]
async fn fail_fast_signals_running_actions() {
    init_tracing();
    let project = Project::new();
    let log = ActionLog::new();

    let graph = GraphBuilder::new()
        .action("hang", RecordingAction::new("hang", &log).waits_for_cancel().boxed())
        .action("bad", RecordingAction::new("bad", &log).sleep(Duration::from_millis(50)).fails("boom").boxed())
        .action("later", RecordingAction::new("later", &log).boxed())
        .build();

    let options = project.options().workers(2).failure_policy(FailurePolicy::FailFast);
    let report = project.run(options, graph).await;

    assert_eq!(report.state_of("bad"), Some(NodeState::Failed));
    assert_eq!(report.state_of("hang"), Some(NodeState::Cancelled));
    assert_eq!(report.state_of("later"), Some(NodeState::Cancelled));
    assert!(!log.ran("later"));
}

#[tokio::test]
async fn panicking_action_fails_only_its_node() {
    init_tracing();
    let project = Project::new();
    let log = ActionLog::new();

    let graph = GraphBuilder::new()
        .action("explode", RecordingAction::new("explode", &log).panics().boxed())
        .action("fine", RecordingAction::new("fine", &log).boxed())
        .build();

    let options = project.options().workers(1).failure_policy(FailurePolicy::Continue);
    let report = project.run(options, graph).await;

    assert_eq!(report.state_of("explode"), Some(NodeState::Failed));
    assert_eq!(report.state_of("fine"), Some(NodeState::Succeeded));
    match &report.node("explode").unwrap().error {
        Some(NodeError::Panicked(message)) => assert!(message.contains("explode"), "{message}"),
        other => panic!("expected a panic error, got {other:?}"),
    }
}

#[tokio::test]
async fn finalizer_runs_after_its_task_fails() {
    init_tracing();
    let project = Project::new();
    let log = ActionLog::new();

    let graph = GraphBuilder::new()
        .action("integration", RecordingAction::new("integration", &log).fails("red").boxed())
        .action("stop_server", RecordingAction::new("stop_server", &log).boxed())
        .action("unrelated", RecordingAction::new("unrelated", &log).boxed())
        .finalized_by("integration", "stop_server")
        .build();

    let options = project.options().workers(1).failure_policy(FailurePolicy::Drain);
    let report = project.run(options, graph).await;

    assert_eq!(report.state_of("integration"), Some(NodeState::Failed));
    assert_eq!(report.state_of("stop_server"), Some(NodeState::Succeeded));
    assert_eq!(report.state_of("unrelated"), Some(NodeState::Cancelled));
    assert!(log.finished_before_start("integration", "stop_server"));
    assert_eq!(report.outcome, RunOutcome::Failed);
}

#[tokio::test]
async fn finalizer_is_cancelled_when_its_task_never_ran() {
    init_tracing();
    let project = Project::new();
    let log = ActionLog::new();

    let graph = GraphBuilder::new()
        .action("compile", RecordingAction::new("compile", &log).fails("broken").boxed())
        .action("test", RecordingAction::new("test", &log).boxed())
        .action("report", RecordingAction::new("report", &log).boxed())
        .depends_on("test", "compile")
        .finalized_by("test", "report")
        .build();

    let report = project.run(project.options(), graph).await;

    assert_eq!(report.state_of("test"), Some(NodeState::Cancelled));
    assert_eq!(report.state_of("report"), Some(NodeState::Cancelled));
    assert_eq!(report.node("report").unwrap().cancelled_by, ids(&["test", "compile"]));
    assert!(!log.ran("report"));
}

#[tokio::test]
async fn external_cancellation_stops_the_run() {
    init_tracing();
    let project = Project::new();
    let log = ActionLog::new();

    let graph = GraphBuilder::new()
        .action("server", RecordingAction::new("server", &log).waits_for_cancel().boxed())
        .action("after_server", RecordingAction::new("after_server", &log).boxed())
        .depends_on("after_server", "server")
        .build();

    let engine = Engine::new(project.options().workers(2));
    let token = engine.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let report = with_timeout(engine.run(graph)).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(report.state_of("server"), Some(NodeState::Cancelled));
    assert_eq!(report.state_of("after_server"), Some(NodeState::Cancelled));
    assert!(log.ran("server"));
    assert!(!log.ran("after_server"));
}

#[tokio::test]
async fn cancelled_engine_starts_nothing() {
    init_tracing();
    let project = Project::new();
    let log = ActionLog::new();

    let graph = GraphBuilder::new()
        .action("a", RecordingAction::new("a", &log).boxed())
        .action("b", RecordingAction::new("b", &log).boxed())
        .build();

    let engine = Engine::new(project.options().workers(1));
    engine.cancellation_token().cancel();
    let report = with_timeout(engine.run(graph)).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert!(!log.ran("a"));
    assert!(!log.ran("b"));
    assert!(report.nodes.iter().all(|n| n.state == NodeState::Cancelled));
}

#[tokio::test]
async fn failed_task_is_retried_on_the_next_build() {
    init_tracing();
    let project = Project::new();
    let log = ActionLog::new();

    let failing = GraphBuilder::new()
        .action("flaky", RecordingAction::new("flaky", &log).fails("first time").boxed())
        .build();
    let report = project.run(project.options(), failing).await;
    assert_eq!(report.state_of("flaky"), Some(NodeState::Failed));

    let passing = GraphBuilder::new()
        .action("flaky", RecordingAction::new("flaky", &log).boxed())
        .build();
    let report = project.run(project.options(), passing).await;
    assert_eq!(report.state_of("flaky"), Some(NodeState::Succeeded));
    assert_eq!(log.runs_of("flaky"), 2);
}
