// src/dag/scheduler.rs

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::graph::FinalizedGraph;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::StateManager;
use crate::dag::task_info::{NodeOutcome, NodeRunInfo, ScheduledNode};
use crate::types::{EdgeKind, FailurePolicy, NodeState, RunOutcome, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Maximum number of nodes running at once. Values below 1 are treated as 1.
    pub workers: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Number of workers when none is configured.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Scheduler holds the finalized graph plus the mutable state of one run.
///
/// It is a pure state machine: it never performs IO. The coordinator calls
/// [`start`](Self::start) once, hands every dispatched node to a worker, and
/// reports each result through [`handle_completion`](Self::handle_completion).
///
/// It is responsible for:
/// - deciding when a node is ready (all ordering predecessors terminal)
/// - bounding concurrency and keeping non-parallel nodes alone
/// - cancelling dependents of failed nodes
/// - applying the failure policy
#[derive(Debug)]
pub struct Scheduler {
    graph: Arc<FinalizedGraph>,
    options: SchedulerOptions,
    nodes: Vec<Option<NodeRunInfo>>,
    ready: BTreeSet<usize>,
    running: usize,
    exclusive_running: bool,
    first_failure: Option<usize>,
    /// No new work except finalizers of nodes that already ran.
    stopping: bool,
    cancel_signalled: bool,
    started: bool,
    finished: bool,
}

impl Scheduler {
    pub fn new(graph: Arc<FinalizedGraph>, options: SchedulerOptions) -> Self {
        let nodes = (0..graph.len())
            .map(|i| graph.is_required(i).then(NodeRunInfo::pending))
            .collect();
        Self {
            graph,
            options: SchedulerOptions {
                workers: options.workers.max(1),
                ..options
            },
            nodes,
            ready: BTreeSet::new(),
            running: 0,
            exclusive_running: false,
            first_failure: None,
            stopping: false,
            cancel_signalled: false,
            started: false,
            finished: false,
        }
    }

    pub fn graph(&self) -> &Arc<FinalizedGraph> {
        &self.graph
    }

    pub fn options(&self) -> SchedulerOptions {
        self.options
    }

    fn manager(&mut self) -> StateManager<'_> {
        StateManager::new(&self.graph, &mut self.nodes, &mut self.ready)
    }

    /// Begin the run: mark initially ready nodes and dispatch the first batch.
    pub fn start(&mut self) -> SchedulerStep {
        if self.started {
            warn!("scheduler already started; ignoring start");
            return SchedulerStep::default();
        }
        self.started = true;
        info!(
            nodes = self.nodes.iter().flatten().count(),
            workers = self.options.workers,
            policy = ?self.options.failure_policy,
            "scheduler: starting run"
        );

        let len = self.graph.len();
        let mut manager = self.manager();
        for index in 0..len {
            manager.evaluate(index);
        }
        self.advance(SchedulerStep::default())
    }

    /// Record the result of a dispatched node and dispatch what became ready.
    pub fn handle_completion(&mut self, index: usize, outcome: NodeOutcome) -> SchedulerStep {
        let Some(info) = self.nodes.get_mut(index).and_then(Option::as_mut) else {
            warn!(index, "completion for node outside the run; ignoring");
            return SchedulerStep::default();
        };
        if info.state != NodeState::Running {
            warn!(task = %self.graph.node(index).id, state = %info.state, "completion for node that is not running; ignoring");
            return SchedulerStep::default();
        }

        info.state = outcome.state();
        self.running -= 1;
        if !self.graph.node(index).parallel {
            self.exclusive_running = false;
        }

        let id = self.graph.node(index).id.clone();
        let mut step = SchedulerStep::default();
        match outcome {
            NodeOutcome::Failed => {
                warn!(task = %id, "node failed");
                if self.first_failure.is_none() {
                    self.first_failure = Some(index);
                }
                match self.options.failure_policy {
                    FailurePolicy::Continue => {}
                    FailurePolicy::Drain => self.stopping = true,
                    FailurePolicy::FailFast => {
                        self.stopping = true;
                        if !self.cancel_signalled {
                            self.cancel_signalled = true;
                            step.signal_cancel = true;
                        }
                    }
                }
            }
            _ => debug!(task = %id, state = %outcome.state(), "node completed"),
        }

        let cancelled = self.manager().settle(index);
        step.newly_cancelled.extend(cancelled.into_iter().map(|i| self.graph.node(i).id.clone()));
        self.advance(step)
    }

    /// Stop the run as if it failed fast: nothing new starts (except
    /// finalizers of nodes that already ran) and running nodes are signalled.
    pub fn cancel_run(&mut self) -> SchedulerStep {
        info!("scheduler: cancellation requested");
        self.stopping = true;
        let mut step = SchedulerStep::default();
        if !self.cancel_signalled {
            self.cancel_signalled = true;
            step.signal_cancel = true;
        }
        self.advance(step)
    }

    /// Dispatch what can run, and close the run when nothing more can.
    fn advance(&mut self, mut step: SchedulerStep) -> SchedulerStep {
        step.dispatched = self.dispatch();

        if self.running == 0 && step.dispatched.is_empty() && !self.all_terminal() {
            if !self.stopping {
                warn!("scheduler stalled with unfinished nodes; cancelling them");
            }
            let cause = self.first_failure;
            let cancelled = self.manager().cancel_remaining(cause);
            step.newly_cancelled
                .extend(cancelled.into_iter().map(|i| self.graph.node(i).id.clone()));
        }

        if !self.finished && self.all_terminal() {
            self.finished = true;
            step.run_just_finished = true;
            info!(outcome = %self.outcome(), "scheduler: all nodes terminal; run finished");
        }
        step
    }

    fn dispatch(&mut self) -> Vec<ScheduledNode> {
        let mut dispatched = Vec::new();
        let candidates: Vec<usize> = self.ready.iter().copied().collect();

        for index in candidates {
            if self.exclusive_running || self.running >= self.options.workers {
                break;
            }
            if self.stopping && !self.may_run_while_stopping(index) {
                continue;
            }
            let node = self.graph.node(index);
            if !node.parallel {
                if self.running > 0 {
                    continue;
                }
                self.exclusive_running = true;
            }

            self.ready.remove(&index);
            if let Some(info) = self.nodes[index].as_mut() {
                info.state = NodeState::Running;
            }
            self.running += 1;
            debug!(task = %node.id, parallel = node.parallel, "dispatching node");
            dispatched.push(ScheduledNode {
                index,
                id: node.id.clone(),
            });
        }

        dispatched
    }

    /// A finalizer may still run after a failure if a node it finalizes ran.
    fn may_run_while_stopping(&self, index: usize) -> bool {
        self.graph
            .predecessors(index)
            .iter()
            .filter(|(_, kind)| *kind == EdgeKind::FinalizedBy)
            .any(|(pred, _)| {
                self.state_at(*pred)
                    .is_some_and(|s| s.is_success() || s == NodeState::Failed)
            })
    }

    fn all_terminal(&self) -> bool {
        self.nodes
            .iter()
            .flatten()
            .all(|info| info.state.is_terminal())
    }

    fn state_at(&self, index: usize) -> Option<NodeState> {
        self.nodes.get(index).copied().flatten().map(|info| info.state)
    }

    pub fn state_of(&self, id: &TaskId) -> Option<NodeState> {
        self.state_at(self.graph.index_of(id)?)
    }

    /// States of the nodes in the run, in declaration order.
    pub fn states(&self) -> Vec<(TaskId, NodeState)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|info| (self.graph.node(i).id.clone(), info.state)))
            .collect()
    }

    /// Chain of nodes that led to `id` being cancelled, nearest first,
    /// ending at the root failure when there is one.
    pub fn cancellation_chain(&self, id: &TaskId) -> Vec<TaskId> {
        let mut chain = Vec::new();
        let mut current = self.graph.index_of(id).and_then(|i| self.nodes[i]);
        while let Some(info) = current {
            if info.state != NodeState::Cancelled {
                break;
            }
            let Some(cause) = info.cancelled_by else {
                break;
            };
            if chain.len() > self.nodes.len() {
                break;
            }
            chain.push(self.graph.node(cause).id.clone());
            current = self.nodes[cause];
        }
        chain
    }

    pub fn running(&self) -> usize {
        self.running
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// SUCCEEDED iff every node of the run succeeded, was up to date or came
    /// from the cache.
    pub fn outcome(&self) -> RunOutcome {
        if self.nodes.iter().flatten().all(|info| info.state.is_success()) {
            RunOutcome::Succeeded
        } else {
            RunOutcome::Failed
        }
    }
}
