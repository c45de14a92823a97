// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use crate::dag::{NodeOutcome, ScheduledNode, Scheduler, SchedulerStep};
use crate::types::RunOutcome;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Hand these nodes to workers.
    Dispatch(Vec<ScheduledNode>),
    /// Ask running nodes to cancel.
    SignalCancellation,
    /// Every node is terminal; the run is over.
    Finish(RunOutcome),
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Translate a scheduler step into shell commands.
///
/// Cancellation is signalled before new work is dispatched so that freshly
/// started finalizers are not caught by it.
pub fn commands_for_step(scheduler: &Scheduler, step: SchedulerStep) -> CoreStep {
    let mut commands = Vec::new();

    if step.signal_cancel {
        commands.push(CoreCommand::SignalCancellation);
    }
    if !step.dispatched.is_empty() {
        commands.push(CoreCommand::Dispatch(step.dispatched));
    }

    let keep_running = !scheduler.is_finished();
    if step.run_just_finished {
        commands.push(CoreCommand::Finish(scheduler.outcome()));
    }

    CoreStep {
        commands,
        keep_running,
    }
}

/// Handle the start of a run.
pub fn handle_start(scheduler: &mut Scheduler) -> CoreStep {
    let step = scheduler.start();
    commands_for_step(scheduler, step)
}

/// Handle a node finishing on a worker.
pub fn handle_node_finished(scheduler: &mut Scheduler, index: usize, outcome: NodeOutcome) -> CoreStep {
    let step = scheduler.handle_completion(index, outcome);
    commands_for_step(scheduler, step)
}

/// Handle an external cancellation request (e.g. Ctrl-C).
pub fn handle_cancel_requested(scheduler: &mut Scheduler) -> CoreStep {
    if scheduler.is_finished() {
        return CoreStep {
            commands: Vec::new(),
            keep_running: false,
        };
    }
    let step = scheduler.cancel_run();
    commands_for_step(scheduler, step)
}
