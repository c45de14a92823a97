// src/engine/report.rs

//! Per-run result returned to the caller.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::dag::Scheduler;
use crate::engine::execution::{NodeExecution, OutOfDateReason};
use crate::errors::NodeError;
use crate::types::{NodeState, RunOutcome, TaskId};

/// Final state of one node of the run.
#[derive(Debug)]
pub struct NodeReport {
    pub id: TaskId,
    pub state: NodeState,
    pub error: Option<NodeError>,
    /// For cancelled nodes: the chain of causes, nearest first.
    pub cancelled_by: Vec<TaskId>,
    pub reason: Option<OutOfDateReason>,
    /// Tree output files the task did not produce. Non-empty means caching
    /// was disabled for it.
    pub overlapping_outputs: Vec<String>,
    pub duration: Duration,
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Nodes of the run in declaration order.
    pub nodes: Vec<NodeReport>,
}

impl RunReport {
    pub(crate) fn build(scheduler: &Scheduler, mut executions: HashMap<usize, NodeExecution>) -> Self {
        let graph = scheduler.graph();
        let nodes = scheduler
            .states()
            .into_iter()
            .map(|(id, state)| {
                let execution = graph.index_of(&id).and_then(|i| executions.remove(&i));
                let cancelled_by = if state == NodeState::Cancelled {
                    scheduler.cancellation_chain(&id)
                } else {
                    Vec::new()
                };
                let (error, reason, overlapping_outputs, duration) = match execution {
                    Some(e) => (e.error, e.reason, e.overlapping_outputs, e.duration),
                    None => (None, None, Vec::new(), Duration::ZERO),
                };
                NodeReport {
                    id,
                    state,
                    error,
                    cancelled_by,
                    reason,
                    overlapping_outputs,
                    duration,
                }
            })
            .collect();

        Self {
            outcome: scheduler.outcome(),
            nodes,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    pub fn node(&self, id: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.id.as_str() == id)
    }

    pub fn state_of(&self, id: &str) -> Option<NodeState> {
        self.node(id).map(|n| n.state)
    }

    /// Ids of nodes in the given state, in declaration order.
    pub fn in_state(&self, state: NodeState) -> Vec<&TaskId> {
        self.nodes
            .iter()
            .filter(|n| n.state == state)
            .map(|n| &n.id)
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes.iter().filter(|n| n.state == NodeState::Failed)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            write!(f, "> Task {} {}", node.id, node.state)?;
            if let Some(err) = &node.error {
                write!(f, ": {err}")?;
            }
            if !node.cancelled_by.is_empty() {
                let chain: Vec<&str> = node.cancelled_by.iter().map(TaskId::as_str).collect();
                write!(f, " (because of {})", chain.join(" <- "))?;
            }
            writeln!(f)?;
        }
        write!(f, "{}", self.outcome)
    }
}
