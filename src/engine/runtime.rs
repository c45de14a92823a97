// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::{ScheduledNode, Scheduler};
use crate::errors::{CachedagError, Result};
use crate::exec::ExecutorBackend;

use super::core::CoreRuntime;
use super::execution::NodeExecution;
use super::{CoreCommand, RuntimeEvent};

/// Drives the scheduler in response to `RuntimeEvent`s, and delegates actual
/// node execution to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics. This struct handles async IO: reading events from
/// channels and dispatching nodes to the executor.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    executions: HashMap<usize, NodeExecution>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

/// What is left once a run completes: the final scheduler state and the
/// execution results of every node that reached a worker.
#[derive(Debug)]
pub struct RuntimeOutput {
    pub scheduler: Scheduler,
    pub executions: HashMap<usize, NodeExecution>,
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(core: CoreRuntime, event_rx: mpsc::Receiver<RuntimeEvent>, executor: E) -> Self {
        Self {
            core,
            event_rx,
            executor,
            executions: HashMap::new(),
        }
    }

    /// Main event loop.
    ///
    /// - Starts the run and dispatches the first ready nodes.
    /// - Consumes `RuntimeEvent`s from `event_rx` until every node is terminal.
    /// - Executes commands returned by the core.
    pub async fn run(mut self) -> Result<RuntimeOutput> {
        info!("runtime started");

        let step = self.core.start();
        let mut keep_running = step.keep_running;
        for command in step.commands {
            self.execute_command(command).await?;
        }

        while keep_running {
            let Some(event) = self.event_rx.recv().await else {
                return Err(CachedagError::Other(anyhow::anyhow!(
                    "runtime event channel closed while {} node(s) were still running",
                    self.core.scheduler().running()
                )));
            };

            debug!(?event, "runtime received event");

            let step = self.core.step(&event);
            if let RuntimeEvent::NodeFinished { index, execution } = event {
                self.executions.insert(index, execution);
            }

            for command in step.commands {
                self.execute_command(command).await?;
            }
            keep_running = step.keep_running;
        }

        info!("runtime exiting");
        Ok(RuntimeOutput {
            scheduler: self.core.into_scheduler(),
            executions: self.executions,
        })
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Dispatch(nodes) => self.spawn_ready(nodes).await?,
            CoreCommand::SignalCancellation => {
                warn!("signalling cancellation to running nodes");
                self.executor.signal_cancel();
            }
            CoreCommand::Finish(outcome) => info!(%outcome, "run finished"),
        }
        Ok(())
    }

    async fn spawn_ready(&mut self, nodes: Vec<ScheduledNode>) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        let ids: Vec<_> = nodes.iter().map(|n| n.id.as_str()).collect();
        debug!(?ids, "spawning ready nodes");
        self.executor.spawn_ready_nodes(nodes).await
    }
}
