// src/dag/state_manager.rs

//! Per-run state transitions for nodes in the scheduler.

use std::collections::BTreeSet;

use tracing::debug;

use crate::dag::graph::FinalizedGraph;
use crate::dag::task_info::NodeRunInfo;
use crate::types::{EdgeKind, NodeState};

/// Result of evaluating a pending node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// Still waiting on at least one predecessor (or not pending).
    Waiting,
    Ready,
    Cancelled,
}

/// Applies readiness and cancellation rules to the per-run node table.
pub struct StateManager<'a> {
    graph: &'a FinalizedGraph,
    nodes: &'a mut [Option<NodeRunInfo>],
    ready: &'a mut BTreeSet<usize>,
}

impl<'a> StateManager<'a> {
    pub fn new(
        graph: &'a FinalizedGraph,
        nodes: &'a mut [Option<NodeRunInfo>],
        ready: &'a mut BTreeSet<usize>,
    ) -> Self {
        Self { graph, nodes, ready }
    }

    fn state(&self, index: usize) -> Option<NodeState> {
        self.nodes[index].map(|info| info.state)
    }

    /// Decide whether a PENDING node becomes READY or CANCELLED.
    ///
    /// - A FAILED or CANCELLED hard/must predecessor cancels the node, even
    ///   while other predecessors are still running.
    /// - Otherwise the node waits until every predecessor in the run is
    ///   terminal.
    /// - A finalizer is cancelled when every node it finalizes was cancelled.
    pub fn evaluate(&mut self, index: usize) -> Evaluation {
        if self.state(index) != Some(NodeState::Pending) {
            return Evaluation::Waiting;
        }
        let graph = self.graph;
        let preds = graph.predecessors(index);

        for &(pred, kind) in preds {
            if kind.propagates_failure() && self.state(pred).is_some_and(NodeState::is_unsuccessful) {
                self.mark_cancelled(index, pred);
                return Evaluation::Cancelled;
            }
        }

        let all_terminal = preds
            .iter()
            .all(|(pred, _)| self.state(*pred).is_none_or(NodeState::is_terminal));
        if !all_terminal {
            return Evaluation::Waiting;
        }

        let finalized: Vec<usize> = preds
            .iter()
            .filter(|(pred, kind)| *kind == EdgeKind::FinalizedBy && self.state(*pred).is_some())
            .map(|(pred, _)| *pred)
            .collect();
        if !finalized.is_empty()
            && finalized
                .iter()
                .all(|pred| self.state(*pred) == Some(NodeState::Cancelled))
        {
            self.mark_cancelled(index, finalized[0]);
            return Evaluation::Cancelled;
        }

        if let Some(info) = self.nodes[index].as_mut() {
            info.state = NodeState::Ready;
        }
        self.ready.insert(index);
        debug!(task = %self.graph.node(index).id, "predecessors terminal; marking Ready");
        Evaluation::Ready
    }

    /// Re-evaluate the successors of a node that just became terminal,
    /// depth-first, cancelling through hard/must edges. Returns the nodes
    /// newly cancelled.
    pub fn settle(&mut self, start: usize) -> Vec<usize> {
        let graph = self.graph;
        let mut cancelled = Vec::new();
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            // Reverse so the earliest-declared successor is processed first.
            for &(succ, _) in graph.successors(node).iter().rev() {
                if self.evaluate(succ) == Evaluation::Cancelled {
                    cancelled.push(succ);
                    stack.push(succ);
                }
            }
        }

        cancelled
    }

    fn mark_cancelled(&mut self, index: usize, cause: usize) {
        if let Some(info) = self.nodes[index].as_mut() {
            info.state = NodeState::Cancelled;
            info.cancelled_by = Some(cause);
        }
        self.ready.remove(&index);
        debug!(
            task = %self.graph.node(index).id,
            cause = %self.graph.node(cause).id,
            "cancelling node due to upstream failure"
        );
    }

    /// Cancel every node of the run that has not started. Returns them.
    pub fn cancel_remaining(&mut self, cause: Option<usize>) -> Vec<usize> {
        let mut cancelled = Vec::new();
        for (index, slot) in self.nodes.iter_mut().enumerate() {
            if let Some(info) = slot {
                if matches!(info.state, NodeState::Pending | NodeState::Ready) {
                    info.state = NodeState::Cancelled;
                    info.cancelled_by = cause;
                    cancelled.push(index);
                }
            }
        }
        self.ready.clear();
        cancelled
    }
}
