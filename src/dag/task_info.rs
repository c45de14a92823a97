// src/dag/task_info.rs

//! Per-run node bookkeeping and dispatch types.

use crate::types::{NodeState, TaskId};

/// Per-run state of a node (internal). `None` in the scheduler's table means
/// the node is not part of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRunInfo {
    pub state: NodeState,
    /// The failed or cancelled node that caused this one to be cancelled.
    pub cancelled_by: Option<usize>,
}

impl NodeRunInfo {
    pub fn pending() -> Self {
        Self {
            state: NodeState::Pending,
            cancelled_by: None,
        }
    }
}

/// How a dispatched node ended, as reported back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    UpToDate,
    FromCache,
    Executed,
    Failed,
    /// The node observed cancellation before doing any work.
    Cancelled,
}

impl NodeOutcome {
    pub fn state(self) -> NodeState {
        match self {
            NodeOutcome::UpToDate => NodeState::Skipped,
            NodeOutcome::FromCache => NodeState::FromCache,
            NodeOutcome::Executed => NodeState::Succeeded,
            NodeOutcome::Failed => NodeState::Failed,
            NodeOutcome::Cancelled => NodeState::Cancelled,
        }
    }
}

/// A node the scheduler wants a worker to run now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledNode {
    pub index: usize,
    pub id: TaskId,
}
