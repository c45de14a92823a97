// tests/runtime_fake_executor.rs

mod common;
use crate::common::actions::{ActionLog, RecordingAction};
use crate::common::builders::GraphBuilder;
use crate::common::fake_executor::FakeExecutor;
use crate::common::{init_tracing, with_timeout};

use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use cachedag::dag::{FinalizedGraph, NodeOutcome, ScheduledNode, Scheduler, SchedulerOptions};
use cachedag::engine::{CoreCommand, CoreRuntime, NodeExecution, Runtime, RuntimeEvent};
use cachedag::exec::ExecutorBackend;
use cachedag::types::{FailurePolicy, NodeState, RunOutcome, TaskId};

type TestResult = Result<(), Box<dyn Error>>;

/// compile -> test -> package, with `lint` on the side.
fn chain_graph() -> FinalizedGraph {
    let log = ActionLog::new();
    GraphBuilder::new()
        .action("compile", RecordingAction::new("compile", &log).boxed())
        .action("test", RecordingAction::new("test", &log).boxed())
        .action("package", RecordingAction::new("package", &log).boxed())
        .action("lint", RecordingAction::new("lint", &log).boxed())
        .depends_on("test", "compile")
        .depends_on("package", "test")
        .build()
}

fn scheduler(graph: FinalizedGraph, workers: usize, policy: FailurePolicy) -> Scheduler {
    Scheduler::new(
        Arc::new(graph),
        SchedulerOptions {
            workers,
            failure_policy: policy,
        },
    )
}

fn finished(index: usize, outcome: NodeOutcome) -> RuntimeEvent {
    RuntimeEvent::NodeFinished {
        index,
        execution: NodeExecution {
            outcome,
            error: None,
            reason: None,
            overlapping_outputs: Vec::new(),
            duration: Duration::ZERO,
        },
    }
}

#[tokio::test]
async fn runtime_runs_chain_in_dependency_order() -> TestResult {
    init_tracing();
    let (tx, rx) = mpsc::channel(64);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeExecutor::new(tx, executed.clone());

    let core = CoreRuntime::new(scheduler(chain_graph(), 1, FailurePolicy::Drain));
    let output = with_timeout(Runtime::new(core, rx, executor).run()).await?;

    assert_eq!(*executed.lock().unwrap(), vec!["compile", "test", "package", "lint"]);
    assert_eq!(output.scheduler.outcome(), RunOutcome::Succeeded);
    assert_eq!(output.executions.len(), 4);
    Ok(())
}

#[tokio::test]
async fn runtime_cancels_dependents_of_a_failure() -> TestResult {
    init_tracing();
    let (tx, rx) = mpsc::channel(64);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeExecutor::new(tx, executed.clone()).with_outcome("compile", NodeOutcome::Failed);

    let core = CoreRuntime::new(scheduler(chain_graph(), 4, FailurePolicy::Continue));
    let output = with_timeout(Runtime::new(core, rx, executor).run()).await?;
    let sched = &output.scheduler;

    assert_eq!(sched.state_of(&TaskId::from("compile")), Some(NodeState::Failed));
    assert_eq!(sched.state_of(&TaskId::from("test")), Some(NodeState::Cancelled));
    assert_eq!(sched.state_of(&TaskId::from("package")), Some(NodeState::Cancelled));
    assert_eq!(sched.state_of(&TaskId::from("lint")), Some(NodeState::Succeeded));
    assert_eq!(
        sched.cancellation_chain(&TaskId::from("package")),
        vec![TaskId::from("test"), TaskId::from("compile")]
    );
    assert!(!executed.lock().unwrap().contains(&"test".to_string()));
    Ok(())
}

#[tokio::test]
async fn fail_fast_signals_the_executor() -> TestResult {
    init_tracing();
    let (tx, rx) = mpsc::channel(64);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeExecutor::new(tx, executed.clone()).with_outcome("compile", NodeOutcome::Failed);
    let signals = executor.cancel_signals();

    let core = CoreRuntime::new(scheduler(chain_graph(), 1, FailurePolicy::FailFast));
    let output = with_timeout(Runtime::new(core, rx, executor).run()).await?;

    assert_eq!(signals.load(Ordering::SeqCst), 1);
    assert_eq!(*executed.lock().unwrap(), vec!["compile"]);
    assert_eq!(output.scheduler.state_of(&TaskId::from("lint")), Some(NodeState::Cancelled));
    assert_eq!(output.scheduler.outcome(), RunOutcome::Failed);
    Ok(())
}

/// Accepts nodes and never reports back.
struct SilentExecutor;

impl ExecutorBackend for SilentExecutor {
    fn spawn_ready_nodes(
        &mut self,
        _nodes: Vec<ScheduledNode>,
    ) -> Pin<Box<dyn Future<Output = cachedag::errors::Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn signal_cancel(&mut self) {}
}

#[tokio::test]
async fn closed_event_channel_is_an_error() {
    init_tracing();
    let (tx, rx) = mpsc::channel(64);
    drop(tx);

    let core = CoreRuntime::new(scheduler(chain_graph(), 1, FailurePolicy::Drain));
    let result = with_timeout(Runtime::new(core, rx, SilentExecutor).run()).await;
    assert!(result.is_err());
}

#[test]
fn core_runtime_steps_without_any_io() {
    let mut core = CoreRuntime::new(scheduler(chain_graph(), 2, FailurePolicy::Drain));

    let step = core.start();
    assert!(step.keep_running);
    match step.commands.as_slice() {
        [CoreCommand::Dispatch(nodes)] => {
            let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
            assert_eq!(ids, vec!["compile", "lint"]);
        }
        other => panic!("unexpected commands: {other:?}"),
    }

    let step = core.step(&finished(3, NodeOutcome::UpToDate));
    assert!(step.commands.is_empty());

    let step = core.step(&finished(0, NodeOutcome::FromCache));
    assert!(matches!(step.commands.as_slice(), [CoreCommand::Dispatch(nodes)] if nodes[0].id.as_str() == "test"));

    let step = core.step(&finished(1, NodeOutcome::Executed));
    assert!(matches!(step.commands.as_slice(), [CoreCommand::Dispatch(nodes)] if nodes[0].id.as_str() == "package"));

    let step = core.step(&finished(2, NodeOutcome::Executed));
    assert!(!step.keep_running);
    assert_eq!(step.commands, vec![CoreCommand::Finish(RunOutcome::Succeeded)]);
    assert!(core.is_finished());

    // Late cancellation after the run is over changes nothing.
    let step = core.step(&RuntimeEvent::CancelRequested);
    assert!(step.commands.is_empty());
    assert!(!step.keep_running);
    assert_eq!(
        core.scheduler().state_of(&TaskId::from("lint")),
        Some(NodeState::Skipped)
    );
}

#[test]
fn cancel_request_signals_then_cancels_pending_nodes() {
    let mut core = CoreRuntime::new(scheduler(chain_graph(), 1, FailurePolicy::Drain));
    core.start();

    let step = core.step(&RuntimeEvent::CancelRequested);
    assert_eq!(step.commands, vec![CoreCommand::SignalCancellation]);
    assert!(step.keep_running, "compile is still running");

    let step = core.step(&finished(0, NodeOutcome::Cancelled));
    assert!(!step.keep_running);
    assert_eq!(step.commands, vec![CoreCommand::Finish(RunOutcome::Failed)]);

    let sched = core.into_scheduler();
    for id in ["compile", "test", "package", "lint"] {
        assert_eq!(sched.state_of(&TaskId::from(id)), Some(NodeState::Cancelled), "{id}");
    }
}
