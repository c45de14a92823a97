use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cachedag::dag::{NodeOutcome, ScheduledNode};
use cachedag::engine::{NodeExecution, RuntimeEvent};
use cachedag::errors::Result;
use cachedag::exec::ExecutorBackend;

/// A fake executor that:
/// - records which nodes were dispatched
/// - immediately reports `NodeFinished` for each, with a scripted outcome
///   (`Executed` unless configured otherwise).
pub struct FakeExecutor {
    runtime_tx: tokio::sync::mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<String>>>,
    outcomes: HashMap<String, NodeOutcome>,
    cancel_signals: Arc<AtomicUsize>,
}

impl FakeExecutor {
    pub fn new(
        runtime_tx: tokio::sync::mpsc::Sender<RuntimeEvent>,
        executed: Arc<Mutex<Vec<String>>>,
    ) -> Self {
        Self {
            runtime_tx,
            executed,
            outcomes: HashMap::new(),
            cancel_signals: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Report `outcome` whenever `task` is dispatched.
    pub fn with_outcome(mut self, task: &str, outcome: NodeOutcome) -> Self {
        self.outcomes.insert(task.to_string(), outcome);
        self
    }

    /// Shared counter of `signal_cancel` calls.
    pub fn cancel_signals(&self) -> Arc<AtomicUsize> {
        self.cancel_signals.clone()
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_nodes(
        &mut self,
        nodes: Vec<ScheduledNode>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);

        Box::pin(async move {
            for node in nodes {
                executed.lock().unwrap().push(node.id.to_string());
                let outcome = self
                    .outcomes
                    .get(node.id.as_str())
                    .copied()
                    .unwrap_or(NodeOutcome::Executed);

                tx.send(RuntimeEvent::NodeFinished {
                    index: node.index,
                    execution: NodeExecution {
                        outcome,
                        error: None,
                        reason: None,
                        overlapping_outputs: Vec::new(),
                        duration: Duration::ZERO,
                    },
                })
                .await
                .map_err(|e| anyhow::anyhow!("runtime channel closed: {e}"))?;
            }
            Ok(())
        })
    }

    fn signal_cancel(&mut self) {
        self.cancel_signals.fetch_add(1, Ordering::SeqCst);
    }
}
