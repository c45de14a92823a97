// src/engine/execution.rs

//! What happens to a single dispatched node.
//!
//! Runs on a blocking worker thread. The decision order is: cancelled,
//! up to date, restorable from cache, execute. Before anything is restored
//! or executed the node's outputs are checked for files it did not produce;
//! finding any disables caching for the node.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheKey};
use crate::engine::overlap::OutputOwnership;
use crate::dag::{FinalizedGraph, NodeOutcome, TaskNode};
use crate::engine::context::BuildContext;
use crate::errors::NodeError;
use crate::exec::ActionContext;
use crate::fingerprint::{Digest, Fingerprint, OutputSnapshot};
use crate::history::{ExecutionRecord, RecordedOutcome};

/// Why a node had to do work instead of being skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutOfDateReason {
    NoHistory,
    ActionChanged,
    /// Names of input properties whose digest changed.
    InputChanged(Vec<String>),
    /// Names of output properties that no longer match the last execution.
    OutputChanged(Vec<String>),
}

impl fmt::Display for OutOfDateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutOfDateReason::NoHistory => f.write_str("no history is available"),
            OutOfDateReason::ActionChanged => f.write_str("the task action has changed"),
            OutOfDateReason::InputChanged(props) => {
                write!(f, "input properties changed: {}", props.join(", "))
            }
            OutOfDateReason::OutputChanged(props) => {
                write!(f, "output properties changed: {}", props.join(", "))
            }
        }
    }
}

/// Result of running one node, sent back to the coordinator.
#[derive(Debug)]
pub struct NodeExecution {
    pub outcome: NodeOutcome,
    pub error: Option<NodeError>,
    pub reason: Option<OutOfDateReason>,
    /// Tree output files found before execution that the node did not
    /// produce, as `property/relative path`.
    pub overlapping_outputs: Vec<String>,
    pub duration: Duration,
}

impl NodeExecution {
    fn new(outcome: NodeOutcome, started: Instant) -> Self {
        Self {
            outcome,
            error: None,
            reason: None,
            overlapping_outputs: Vec::new(),
            duration: started.elapsed(),
        }
    }

    pub fn failed(error: NodeError, duration: Duration) -> Self {
        Self {
            outcome: NodeOutcome::Failed,
            error: Some(error),
            reason: None,
            overlapping_outputs: Vec::new(),
            duration,
        }
    }

    fn with_reason(mut self, reason: Option<OutOfDateReason>) -> Self {
        self.reason = reason;
        self
    }

    fn with_error(mut self, error: NodeError) -> Self {
        self.error = Some(error);
        self
    }

    fn with_overlap(mut self, ownership: &OutputOwnership) -> Self {
        self.overlapping_outputs = ownership.describe();
        self
    }
}

/// How restoring a cache hit went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Restore {
    Verified,
    /// The restored outputs do not match the entry's recorded fingerprint.
    Mismatch,
    /// Writing the outputs failed; the entry itself may be fine.
    Failed,
}

/// Execute the node at `index`.
///
/// `token` is the node's own cancellation token (a child of the run token).
pub fn execute_node(
    graph: &FinalizedGraph,
    index: usize,
    ctx: &BuildContext,
    token: CancellationToken,
) -> NodeExecution {
    let node = graph.node(index);
    let started = Instant::now();

    if token.is_cancelled() {
        info!(task = %node.id, "cancellation already requested; not running");
        return NodeExecution::new(NodeOutcome::Cancelled, started);
    }

    let fingerprinter = ctx.fingerprinter();
    let inputs = match fingerprinter.fingerprint_inputs(&node.inputs) {
        Ok(inputs) => inputs,
        Err(err) => {
            warn!(task = %node.id, error = %err, "cannot fingerprint inputs");
            return NodeExecution::new(NodeOutcome::Failed, started)
                .with_error(NodeError::InputUnreadable(err));
        }
    };
    let action_identity = Digest::of_bytes(node.action.identity().as_bytes());
    let previous = ctx.history().lookup(&node.id);

    let reason = match out_of_date_reason(ctx, node, previous.as_ref(), &action_identity, &inputs) {
        None => {
            info!(task = %node.id, "UP-TO-DATE");
            return NodeExecution::new(NodeOutcome::UpToDate, started);
        }
        Some(reason) => reason,
    };
    info!(task = %node.id, reason = %reason, "task is out of date");

    let ownership = match fingerprinter.tree_contents(&node.outputs) {
        Ok(before) => OutputOwnership::detect(&before, previous.as_ref().map(|r| &r.owned_outputs)),
        Err(err) => {
            warn!(task = %node.id, error = %err, "cannot list existing outputs");
            return NodeExecution::new(NodeOutcome::Failed, started)
                .with_error(NodeError::OutputCleanup(err.into()))
                .with_reason(Some(reason));
        }
    };
    if ownership.has_overlap() {
        warn!(
            task = %node.id,
            files = ?ownership.describe(),
            "outputs contain files this task did not produce; caching disabled"
        );
    }

    let cache_key = (node.cacheable && ctx.cache().is_enabled() && !ownership.has_overlap())
        .then(|| CacheKey::derive(&action_identity, &inputs, &node.outputs));

    if let Some(key) = &cache_key {
        if let Some(hit) = ctx.cache().load(key) {
            match restore_from_cache(ctx, node, &hit.entry) {
                Restore::Verified => {
                    ctx.cache().accept(key, &hit);
                    let entry = &hit.entry;
                    let record = ExecutionRecord {
                        task: node.id.clone(),
                        action_identity: action_identity.clone(),
                        inputs: inputs.clone(),
                        outputs: entry.output_fingerprint.clone(),
                        owned_outputs: entry.outputs.tree_contents(),
                        outcome: RecordedOutcome::FromCache,
                        timestamp: Utc::now(),
                        duration_ms: entry.metadata.execution_ms,
                    };
                    if let Err(err) = ctx.history().record(&node.id, record) {
                        warn!(task = %node.id, error = %err, "failed to record history");
                    }
                    info!(task = %node.id, key = %key, origin = %entry.metadata.origin_task, "FROM-CACHE");
                    return NodeExecution::new(NodeOutcome::FromCache, started).with_reason(Some(reason));
                }
                Restore::Mismatch => ctx.cache().reject(key, &hit),
                Restore::Failed => {}
            }
        }
    }

    run_action(ctx, node, token, started, &action_identity, inputs, cache_key.as_ref(), &ownership)
        .with_reason(Some(reason))
        .with_overlap(&ownership)
}

/// `None` when the node is up to date.
fn out_of_date_reason(
    ctx: &BuildContext,
    node: &TaskNode,
    previous: Option<&ExecutionRecord>,
    action_identity: &Digest,
    inputs: &Fingerprint,
) -> Option<OutOfDateReason> {
    let Some(record) = previous else {
        return Some(OutOfDateReason::NoHistory);
    };
    if &record.action_identity != action_identity {
        return Some(OutOfDateReason::ActionChanged);
    }
    if &record.inputs != inputs {
        return Some(OutOfDateReason::InputChanged(record.inputs.changed_properties(inputs)));
    }
    match ctx.fingerprinter().fingerprint_outputs(&node.outputs) {
        Ok(current) if current == record.outputs => None,
        Ok(current) => Some(OutOfDateReason::OutputChanged(
            record.outputs.changed_properties(&current),
        )),
        Err(err) => {
            debug!(task = %node.id, error = %err, "cannot fingerprint current outputs");
            Some(OutOfDateReason::OutputChanged(
                node.outputs.iter().map(|o| o.name.clone()).collect(),
            ))
        }
    }
}

/// Replace the node's outputs with the entry's content and check them
/// against the recorded fingerprint.
fn restore_from_cache(ctx: &BuildContext, node: &TaskNode, entry: &CacheEntry) -> Restore {
    let fingerprinter = ctx.fingerprinter();
    let restored = fingerprinter
        .clear_outputs(&node.outputs)
        .and_then(|()| fingerprinter.restore_outputs(&node.outputs, &entry.outputs));
    if let Err(err) = restored {
        warn!(task = %node.id, key = %entry.key, error = %format!("{err:#}"), "failed to restore outputs from cache");
        return Restore::Failed;
    }

    match fingerprinter.fingerprint_outputs(&node.outputs) {
        Ok(actual) if actual == entry.output_fingerprint => Restore::Verified,
        Ok(actual) => {
            warn!(
                task = %node.id,
                key = %entry.key,
                mismatched = ?entry.output_fingerprint.changed_properties(&actual),
                "CacheCorruption: restored outputs do not match the recorded fingerprint; executing instead"
            );
            Restore::Mismatch
        }
        Err(err) => {
            warn!(task = %node.id, key = %entry.key, error = %err, "cannot fingerprint restored outputs");
            Restore::Failed
        }
    }
}

fn run_action(
    ctx: &BuildContext,
    node: &TaskNode,
    token: CancellationToken,
    started: Instant,
    action_identity: &Digest,
    inputs: Fingerprint,
    cache_key: Option<&CacheKey>,
    ownership: &OutputOwnership,
) -> NodeExecution {
    let fingerprinter = ctx.fingerprinter();
    // Whatever a previous execution or restore left behind must not end up
    // in this execution's outputs. Foreign files stay.
    if let Err(err) = fingerprinter.clear_outputs_keeping(&node.outputs, ownership.foreign()) {
        warn!(task = %node.id, error = %format!("{err:#}"), "cannot clean previous outputs");
        return NodeExecution::new(NodeOutcome::Failed, started).with_error(NodeError::OutputCleanup(err));
    }

    let action_ctx = ActionContext::new(node.id.clone(), fingerprinter.root(), token.clone());
    info!(task = %node.id, "EXECUTING");
    let exec_started = Instant::now();
    let result = node.action.run(&action_ctx);
    let execution_ms = exec_started.elapsed().as_millis() as u64;
    fingerprinter.invalidate_outputs(&node.outputs);

    if let Err(err) = result {
        let outcome = if token.is_cancelled() {
            NodeOutcome::Cancelled
        } else {
            NodeOutcome::Failed
        };
        warn!(task = %node.id, error = %format!("{err:#}"), ?outcome, "task action failed");
        return NodeExecution::new(outcome, started).with_error(NodeError::ActionFailed(err));
    }

    let captured = match cache_key {
        Some(_) => fingerprinter
            .snapshot_outputs(&node.outputs)
            .map(|snapshot| (snapshot.fingerprint(), Some(snapshot))),
        None => fingerprinter
            .fingerprint_outputs(&node.outputs)
            .map(|fingerprint| (fingerprint, None::<OutputSnapshot>)),
    };
    let captured = captured.and_then(|(fingerprint, snapshot)| {
        let owned = match &snapshot {
            Some(snapshot) => snapshot.tree_contents(),
            None => fingerprinter.tree_contents(&node.outputs)?,
        };
        Ok((fingerprint, snapshot, ownership.owned(owned)))
    });
    let (outputs, snapshot, owned_outputs) = match captured {
        Ok(captured) => captured,
        Err(err) => {
            warn!(task = %node.id, error = %err, "cannot fingerprint outputs after execution");
            return NodeExecution::new(NodeOutcome::Failed, started)
                .with_error(NodeError::OutputUnreadable(err));
        }
    };

    let record = ExecutionRecord {
        task: node.id.clone(),
        action_identity: action_identity.clone(),
        inputs,
        outputs: outputs.clone(),
        owned_outputs,
        outcome: RecordedOutcome::Executed,
        timestamp: Utc::now(),
        duration_ms: execution_ms,
    };
    if let Err(err) = ctx.history().record(&node.id, record) {
        warn!(task = %node.id, error = %err, "failed to record history");
    }

    if let (Some(key), Some(snapshot)) = (cache_key, snapshot) {
        let entry = CacheEntry::new(key.clone(), node.id.clone(), snapshot, outputs, execution_ms);
        let outcome = ctx.cache().store(key, &entry);
        debug!(task = %node.id, key = %key, ?outcome, "cache store finished");
    }

    info!(task = %node.id, execution_ms, "EXECUTED");
    NodeExecution::new(NodeOutcome::Executed, started)
}
