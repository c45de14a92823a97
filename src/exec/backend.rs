// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of spawning work itself.
//! This makes it easy to swap in a fake executor in tests while keeping the
//! production implementation, [`WorkerPool`], here.
//!
//! - `WorkerPool` runs every dispatched node on Tokio's blocking pool and
//!   reports a `NodeFinished` event when the node is done.
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which nodes were dispatched and directly emits completion events.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::dag::{FinalizedGraph, ScheduledNode};
use crate::engine::{BuildContext, NodeExecution, RuntimeEvent, execute_node};
use crate::errors::{NodeError, Result};

/// Trait abstracting how scheduled nodes are executed.
///
/// Production code uses [`WorkerPool`]; tests can provide their own
/// implementation that doesn't touch the filesystem.
pub trait ExecutorBackend: Send {
    /// Start the given nodes. Each must eventually produce exactly one
    /// `RuntimeEvent::NodeFinished`.
    fn spawn_ready_nodes(
        &mut self,
        nodes: Vec<ScheduledNode>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Ask every node that is currently running to stop.
    fn signal_cancel(&mut self);
}

/// Production executor backend.
pub struct WorkerPool {
    graph: Arc<FinalizedGraph>,
    ctx: Arc<BuildContext>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    /// Per-node tokens of the nodes currently running.
    active: Arc<Mutex<HashMap<usize, CancellationToken>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("run_id", &self.ctx.run_id())
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    pub fn new(
        graph: Arc<FinalizedGraph>,
        ctx: Arc<BuildContext>,
        runtime_tx: mpsc::Sender<RuntimeEvent>,
    ) -> Self {
        Self {
            graph,
            ctx,
            runtime_tx,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }

    fn spawn_node(&self, node: ScheduledNode) {
        let token = self.ctx.cancellation_token().child_token();
        lock(&self.active).insert(node.index, token.clone());

        let graph = self.graph.clone();
        let ctx = self.ctx.clone();
        let tx = self.runtime_tx.clone();
        let active = self.active.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let index = node.index;
            let worker = tokio::task::spawn_blocking(move || execute_node(&graph, index, &ctx, token));

            let execution = match worker.await {
                Ok(execution) => execution,
                Err(join_err) => {
                    let message = panic_message(join_err);
                    error!(task = %node.id, %message, "task worker panicked");
                    NodeExecution::failed(NodeError::Panicked(message), started.elapsed())
                }
            };

            lock(&active).remove(&index);
            debug!(task = %node.id, outcome = ?execution.outcome, "node finished on worker");
            if tx
                .send(RuntimeEvent::NodeFinished { index, execution })
                .await
                .is_err()
            {
                debug!(task = %node.id, "runtime gone; dropping node result");
            }
        });
    }
}

impl ExecutorBackend for WorkerPool {
    fn spawn_ready_nodes(
        &mut self,
        nodes: Vec<ScheduledNode>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for node in nodes {
                self.spawn_node(node);
            }
            Ok(())
        })
    }

    fn signal_cancel(&mut self) {
        for token in lock(&self.active).values() {
            token.cancel();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn panic_message(err: tokio::task::JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string()),
        Err(err) => err.to_string(),
    }
}
