// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::task_info::ScheduledNode;
use crate::types::TaskId;

/// Structured result of a single scheduler "step".
///
/// Tests can drive the scheduler by hand and assert on each step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStep {
    /// Nodes to hand to workers now, in dispatch order.
    pub dispatched: Vec<ScheduledNode>,
    /// Nodes newly marked CANCELLED in this step.
    pub newly_cancelled: Vec<TaskId>,
    /// Running nodes should be asked to cancel (fail-fast or external cancel).
    pub signal_cancel: bool,
    /// Every node of the run is now terminal.
    pub run_just_finished: bool,
}
