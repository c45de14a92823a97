// tests/incremental_build.rs

mod common;
use crate::common::actions::{count, ActionLog, RecordingAction, UppercaseAction};
use crate::common::builders::GraphBuilder;
use crate::common::{init_tracing, Project};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cachedag::dag::{FinalizedGraph, TaskNode};
use cachedag::engine::OutOfDateReason;
use cachedag::errors::NodeError;
use cachedag::exec::FnAction;
use cachedag::fingerprint::PropertySpec;
use cachedag::types::{FailurePolicy, NodeState, RunOutcome, TaskId};

/// `compile` concatenates two sources into `build/o1.txt`; `test` reads it and
/// writes a report.
fn compile_test_graph(compile_runs: &Arc<AtomicUsize>, test_runs: &Arc<AtomicUsize>) -> FinalizedGraph {
    let runs = compile_runs.clone();
    let compile = FnAction::new("concat-sources-v1", move |ctx| {
        runs.fetch_add(1, Ordering::SeqCst);
        let s1 = std::fs::read_to_string(ctx.root_dir().join("src/s1.txt"))?;
        let s2 = std::fs::read_to_string(ctx.root_dir().join("src/s2.txt"))?;
        std::fs::create_dir_all(ctx.root_dir().join("build"))?;
        std::fs::write(ctx.root_dir().join("build/o1.txt"), format!("{s1}{s2}"))?;
        Ok(())
    });

    let runs = test_runs.clone();
    let test = FnAction::new("check-output-v1", move |ctx| {
        runs.fetch_add(1, Ordering::SeqCst);
        let o1 = std::fs::read_to_string(ctx.root_dir().join("build/o1.txt"))?;
        std::fs::create_dir_all(ctx.root_dir().join("reports"))?;
        std::fs::write(ctx.root_dir().join("reports/test.txt"), format!("checked {} bytes", o1.len()))?;
        Ok(())
    });

    GraphBuilder::new()
        .task(
            TaskNode::new("compile", Arc::new(compile))
                .input(PropertySpec::file("s1", "src/s1.txt"))
                .input(PropertySpec::file("s2", "src/s2.txt"))
                .output(PropertySpec::file("o1", "build/o1.txt"))
                .cacheable(true),
        )
        .task(
            TaskNode::new("test", Arc::new(test))
                .input(PropertySpec::file("o1", "build/o1.txt"))
                .output(PropertySpec::file("report", "reports/test.txt")),
        )
        .depends_on("test", "compile")
        .build()
}

fn uppercase_graph(action: &UppercaseAction) -> FinalizedGraph {
    GraphBuilder::new()
        .task(
            TaskNode::new("upper", Arc::new(action.clone()))
                .input(PropertySpec::file("src", "src/a.txt"))
                .output(PropertySpec::file("out", "out/a.txt")),
        )
        .build()
}

#[tokio::test]
async fn compile_then_test_scenario() {
    init_tracing();
    let project = Project::new();
    project.write("src/s1.txt", "alpha\n");
    project.write("src/s2.txt", "beta\n");

    let compile_runs = Arc::new(AtomicUsize::new(0));
    let test_runs = Arc::new(AtomicUsize::new(0));

    // First run executes both.
    let report = project
        .run(project.options(), compile_test_graph(&compile_runs, &test_runs))
        .await;
    assert_eq!(report.outcome, RunOutcome::Succeeded);
    assert_eq!(report.state_of("compile"), Some(NodeState::Succeeded));
    assert_eq!(report.state_of("test"), Some(NodeState::Succeeded));
    assert_eq!(report.node("compile").unwrap().reason, Some(OutOfDateReason::NoHistory));
    assert_eq!(project.read("build/o1.txt"), "alpha\nbeta\n");

    // Nothing changed: both skipped.
    let report = project
        .run(project.options(), compile_test_graph(&compile_runs, &test_runs))
        .await;
    assert_eq!(report.state_of("compile"), Some(NodeState::Skipped));
    assert_eq!(report.state_of("test"), Some(NodeState::Skipped));
    assert_eq!(compile_runs.load(Ordering::SeqCst), 1);
    assert_eq!(test_runs.load(Ordering::SeqCst), 1);

    // Changing S1 re-executes compile, and test through its changed input.
    project.write("src/s1.txt", "ALPHA\n");
    let report = project
        .run(project.options(), compile_test_graph(&compile_runs, &test_runs))
        .await;
    assert_eq!(report.state_of("compile"), Some(NodeState::Succeeded));
    assert_eq!(report.state_of("test"), Some(NodeState::Succeeded));
    assert_eq!(
        report.node("compile").unwrap().reason,
        Some(OutOfDateReason::InputChanged(vec!["s1".to_string()]))
    );
    assert_eq!(
        report.node("test").unwrap().reason,
        Some(OutOfDateReason::InputChanged(vec!["o1".to_string()]))
    );
    assert_eq!(compile_runs.load(Ordering::SeqCst), 2);
    assert_eq!(test_runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn reverting_an_input_restores_outputs_from_cache() {
    init_tracing();
    let project = Project::new();
    project.write("src/s1.txt", "one\n");
    project.write("src/s2.txt", "two\n");

    let compile_runs = Arc::new(AtomicUsize::new(0));
    let test_runs = Arc::new(AtomicUsize::new(0));

    project
        .run(project.options(), compile_test_graph(&compile_runs, &test_runs))
        .await;
    project.write("src/s1.txt", "changed\n");
    project
        .run(project.options(), compile_test_graph(&compile_runs, &test_runs))
        .await;
    assert_eq!(compile_runs.load(Ordering::SeqCst), 2);

    project.write("src/s1.txt", "one\n");
    let report = project
        .run(project.options(), compile_test_graph(&compile_runs, &test_runs))
        .await;

    assert_eq!(report.state_of("compile"), Some(NodeState::FromCache));
    assert_eq!(compile_runs.load(Ordering::SeqCst), 2);
    assert_eq!(project.read("build/o1.txt"), "one\ntwo\n");
    // test is not cacheable and its input changed back, so it runs.
    assert_eq!(report.state_of("test"), Some(NodeState::Succeeded));
    assert_eq!(report.outcome, RunOutcome::Succeeded);
}

#[tokio::test]
async fn second_run_is_idempotent() {
    init_tracing();
    let project = Project::new();
    project.write("src/a.txt", "hello");
    let action = UppercaseAction::new("src/a.txt", "out/a.txt");

    project.run(project.options(), uppercase_graph(&action)).await;
    let first_output = project.read("out/a.txt");

    for _ in 0..2 {
        let report = project.run(project.options(), uppercase_graph(&action)).await;
        assert_eq!(report.state_of("upper"), Some(NodeState::Skipped));
        assert!(report.is_success());
    }
    assert_eq!(count(&action.runs()), 1);
    assert_eq!(project.read("out/a.txt"), first_output);
    assert_eq!(first_output, "HELLO");
}

#[tokio::test]
async fn deleted_output_triggers_reexecution() {
    init_tracing();
    let project = Project::new();
    project.write("src/a.txt", "hello");
    let action = UppercaseAction::new("src/a.txt", "out/a.txt");

    project.run(project.options(), uppercase_graph(&action)).await;
    project.remove("out/a.txt");

    let report = project.run(project.options(), uppercase_graph(&action)).await;
    assert_eq!(report.state_of("upper"), Some(NodeState::Succeeded));
    assert_eq!(
        report.node("upper").unwrap().reason,
        Some(OutOfDateReason::OutputChanged(vec!["out".to_string()]))
    );
    assert_eq!(project.read("out/a.txt"), "HELLO");
    assert_eq!(count(&action.runs()), 2);
}

#[tokio::test]
async fn tampered_output_triggers_reexecution() {
    init_tracing();
    let project = Project::new();
    project.write("src/a.txt", "hello");
    let action = UppercaseAction::new("src/a.txt", "out/a.txt");

    project.run(project.options(), uppercase_graph(&action)).await;
    project.write("out/a.txt", "edited by hand");

    let report = project.run(project.options(), uppercase_graph(&action)).await;
    assert_eq!(report.state_of("upper"), Some(NodeState::Succeeded));
    assert_eq!(project.read("out/a.txt"), "HELLO");
}

#[tokio::test]
async fn changed_action_identity_reexecutes() {
    init_tracing();
    let project = Project::new();
    let log = ActionLog::new();

    let graph = |identity: &str| {
        GraphBuilder::new()
            .task(TaskNode::new(
                "gen",
                RecordingAction::new("gen", &log)
                    .identity(identity)
                    .writes("gen/out.txt", "generated")
                    .boxed(),
            ).output(PropertySpec::file("out", "gen/out.txt")))
            .build()
    };

    project.run(project.options(), graph("gen-v1")).await;
    let report = project.run(project.options(), graph("gen-v1")).await;
    assert_eq!(report.state_of("gen"), Some(NodeState::Skipped));

    let report = project.run(project.options(), graph("gen-v2")).await;
    assert_eq!(report.state_of("gen"), Some(NodeState::Succeeded));
    assert_eq!(report.node("gen").unwrap().reason, Some(OutOfDateReason::ActionChanged));
    assert_eq!(log.runs_of("gen"), 2);
}

#[tokio::test]
async fn tree_inputs_track_added_files_and_respect_filters() {
    init_tracing();
    let project = Project::new();
    project.write("src/main.c", "int main() {}");
    project.write("src/notes.md", "notes");
    let log = ActionLog::new();

    let graph = || {
        GraphBuilder::new()
            .task(
                TaskNode::new("build", RecordingAction::new("build", &log).boxed())
                    .input(PropertySpec::filtered_tree(
                        "sources",
                        "src",
                        vec!["**/*.c".to_string()],
                        vec![],
                    )),
            )
            .build()
    };

    project.run(project.options(), graph()).await;

    // Files outside the include pattern do not matter.
    project.write("src/other.md", "more notes");
    let report = project.run(project.options(), graph()).await;
    assert_eq!(report.state_of("build"), Some(NodeState::Skipped));

    // A new matching file does.
    project.write("src/util.c", "void util() {}");
    let report = project.run(project.options(), graph()).await;
    assert_eq!(report.state_of("build"), Some(NodeState::Succeeded));
    assert_eq!(log.runs_of("build"), 2);
}

#[tokio::test]
async fn missing_input_file_fails_only_that_node_and_cancels_dependents() {
    init_tracing();
    let project = Project::new();
    let log = ActionLog::new();

    let graph = GraphBuilder::new()
        .task(
            TaskNode::new("compile", RecordingAction::new("compile", &log).boxed())
                .input(PropertySpec::file("main", "src/missing.c")),
        )
        .action("test", RecordingAction::new("test", &log).boxed())
        .action("lint", RecordingAction::new("lint", &log).boxed())
        .depends_on("test", "compile")
        .build();

    let report = project
        .run(project.options().failure_policy(FailurePolicy::Continue), graph)
        .await;

    assert_eq!(report.outcome, RunOutcome::Failed);
    let compile = report.node("compile").unwrap();
    assert_eq!(compile.state, NodeState::Failed);
    assert!(matches!(compile.error, Some(NodeError::InputUnreadable(_))));
    assert_eq!(report.state_of("test"), Some(NodeState::Cancelled));
    assert_eq!(report.node("test").unwrap().cancelled_by, vec![TaskId::from("compile")]);
    assert_eq!(report.state_of("lint"), Some(NodeState::Succeeded));
    assert!(!log.ran("compile"));
    assert!(!log.ran("test"));
}

#[tokio::test]
async fn value_inputs_are_part_of_the_fingerprint() {
    init_tracing();
    let project = Project::new();
    let log = ActionLog::new();

    let graph = |opt_level: u32| {
        GraphBuilder::new()
            .task(
                TaskNode::new("compile", RecordingAction::new("compile", &log).boxed())
                    .input(PropertySpec::value("opt_level", opt_level))
                    .input(PropertySpec::value_set(
                        "features",
                        vec!["b".into(), "a".into()],
                    )),
            )
            .build()
    };

    project.run(project.options(), graph(2)).await;
    let report = project.run(project.options(), graph(2)).await;
    assert_eq!(report.state_of("compile"), Some(NodeState::Skipped));

    let report = project.run(project.options(), graph(3)).await;
    assert_eq!(
        report.node("compile").unwrap().reason,
        Some(OutOfDateReason::InputChanged(vec!["opt_level".to_string()]))
    );
    assert_eq!(log.runs_of("compile"), 2);
}

#[tokio::test]
async fn failed_action_writes_no_history() {
    init_tracing();
    let project = Project::new();
    let log = ActionLog::new();

    let failing = GraphBuilder::new()
        .action("flaky", RecordingAction::new("flaky", &log).fails("boom").boxed())
        .build();
    let report = project.run(project.options(), failing).await;
    let flaky = report.node("flaky").unwrap();
    assert_eq!(flaky.state, NodeState::Failed);
    let message = format!("{}", flaky.error.as_ref().unwrap());
    assert!(message.contains("boom"), "unexpected error: {message}");

    // Same identity, now succeeding: there is no history, so it executes.
    let fixed = GraphBuilder::new()
        .action("flaky", RecordingAction::new("flaky", &log).boxed())
        .build();
    let report = project.run(project.options(), fixed).await;
    assert_eq!(report.state_of("flaky"), Some(NodeState::Succeeded));
    assert_eq!(report.node("flaky").unwrap().reason, Some(OutOfDateReason::NoHistory));
}
