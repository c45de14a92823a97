// src/engine/mod.rs

//! Build execution engine for cachedag.
//!
//! This module ties together:
//! - the DAG scheduler
//! - the per-node decision (up to date, restore from cache, execute)
//! - the main runtime event loop that reacts to:
//!   - node completion events from workers
//!   - cancellation requests (e.g. Ctrl-C)
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]. [`Engine`] is the entry point that wires a
//! finalized graph, the history store and the build cache together for a run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{BuildCache, CacheBackend, LocalCacheBackend};
use crate::dag::{FinalizedGraph, Scheduler, SchedulerOptions, default_workers};
use crate::errors::Result;
use crate::exec::WorkerPool;
use crate::fingerprint::Fingerprinter;
use crate::fs::{FileSystem, RealFileSystem};
use crate::history::{FileHistoryStore, HistoryStore};
use crate::types::FailurePolicy;

pub mod context;
pub mod core;
pub mod event_handlers;
pub mod execution;
pub mod overlap;
pub mod report;
pub mod runtime;

pub use context::BuildContext;
pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use execution::{NodeExecution, OutOfDateReason, execute_node};
pub use overlap::OutputOwnership;
pub use report::{NodeReport, RunReport};
pub use runtime::{Runtime, RuntimeOutput};

/// Directory under the project root holding history and the local cache.
pub const DEFAULT_STATE_DIR: &str = ".cachedag";

/// Events flowing into the runtime from workers and signal handlers.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// A dispatched node reached a terminal outcome on a worker.
    NodeFinished {
        index: usize,
        execution: NodeExecution,
    },
    /// Cancellation requested from outside the run (e.g. Ctrl-C).
    CancelRequested,
}

/// Which caches a run reads from and writes to.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub local: Option<Arc<dyn CacheBackend>>,
    pub remote: Option<Arc<dyn CacheBackend>>,
    pub push_local: bool,
    pub push_remote: bool,
}

impl CacheOptions {
    pub fn disabled() -> Self {
        Self {
            local: None,
            remote: None,
            push_local: true,
            push_remote: false,
        }
    }

    pub fn local_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            local: Some(Arc::new(LocalCacheBackend::new(dir))),
            ..Self::disabled()
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn CacheBackend>, push: bool) -> Self {
        self.remote = Some(remote);
        self.push_remote = push;
        self
    }

    fn build(&self) -> BuildCache {
        BuildCache::new(self.local.clone(), self.remote.clone())
            .with_push(self.push_local, self.push_remote)
    }
}

/// Everything an [`Engine`] needs besides the graph itself.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub root_dir: PathBuf,
    pub workers: usize,
    pub failure_policy: FailurePolicy,
    pub fs: Arc<dyn FileSystem>,
    pub history: Arc<dyn HistoryStore>,
    pub cache: CacheOptions,
    /// External cancellation; cancelling it cancels the current run.
    pub cancellation: CancellationToken,
}

impl EngineOptions {
    /// Real filesystem, history under `<root>/.cachedag` and a local cache
    /// under `<root>/.cachedag/cache`.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        let root_dir = root_dir.into();
        let state_dir = root_dir.join(DEFAULT_STATE_DIR);
        Self {
            history: Arc::new(FileHistoryStore::new(&state_dir)),
            cache: CacheOptions::local_dir(state_dir.join("cache")),
            root_dir,
            workers: default_workers(),
            failure_policy: FailurePolicy::default(),
            fs: Arc::new(RealFileSystem),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = history;
        self
    }

    pub fn cache(mut self, cache: CacheOptions) -> Self {
        self.cache = cache;
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// Runs finalized graphs. One engine may run many graphs, one after another
/// or concurrently; every run gets its own [`BuildContext`].
#[derive(Debug)]
pub struct Engine {
    options: EngineOptions,
    next_run: AtomicU64,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            next_run: AtomicU64::new(1),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn root_dir(&self) -> &Path {
        &self.options.root_dir
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.options.cancellation.clone()
    }

    /// Execute every node of the run and wait until all are terminal.
    ///
    /// Node failures are reported in the [`RunReport`], not as `Err`; an
    /// `Err` means the engine itself could not drive the run.
    pub async fn run(&self, graph: FinalizedGraph) -> Result<RunReport> {
        let run_id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let graph = Arc::new(graph);
        let run_token = self.options.cancellation.child_token();
        let started = Instant::now();

        for (from, to) in graph.dropped_edges() {
            warn!(run_id, from = %from, to = %to, "should-run-after edge dropped to avoid a cycle");
        }

        let ctx = Arc::new(BuildContext::new(
            run_id,
            Fingerprinter::new(self.options.fs.clone(), self.options.root_dir.clone()),
            self.options.history.clone(),
            self.options.cache.build(),
            run_token.clone(),
        ));

        let (event_tx, event_rx) = mpsc::channel::<RuntimeEvent>(64);
        let pool = WorkerPool::new(graph.clone(), ctx.clone(), event_tx.clone());

        let watcher = {
            let token = run_token.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                let _ = event_tx.send(RuntimeEvent::CancelRequested).await;
            })
        };

        let scheduler = Scheduler::new(
            graph,
            SchedulerOptions {
                workers: self.options.workers,
                failure_policy: self.options.failure_policy,
            },
        );
        info!(run_id, root = %self.options.root_dir.display(), "starting build");

        let output = Runtime::new(CoreRuntime::new(scheduler), event_rx, pool).run().await;
        watcher.abort();
        let output = output?;

        let report = RunReport::build(&output.scheduler, output.executions);
        info!(
            run_id,
            outcome = %report.outcome,
            nodes = report.nodes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "build finished"
        );
        Ok(report)
    }
}
