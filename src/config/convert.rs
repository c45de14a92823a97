// src/config/convert.rs

//! Turn a validated [`ConfigFile`] into a task graph and engine options.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::cache::{DirectoryTransport, RemoteCacheBackend};
use crate::config::model::{ConfigFile, TaskConfig};
use crate::dag::{TaskGraph, TaskNode, default_workers};
use crate::engine::{CacheOptions, DEFAULT_STATE_DIR, EngineOptions};
use crate::errors::{CachedagError, Result};
use crate::exec::ShellAction;
use crate::history::FileHistoryStore;

impl ConfigFile {
    /// Build the task graph: one node per `[task.<name>]` in name order, with
    /// every declared relationship as an edge. No entry tasks are selected.
    pub fn to_graph(&self) -> Result<TaskGraph> {
        let mut graph = TaskGraph::new();
        for (name, task) in &self.task {
            graph.add_task(task_node(name, task)?)?;
        }

        for (name, task) in &self.task {
            for dep in &task.after {
                graph.depends_on(name.as_str(), dep.as_str());
            }
            for other in &task.must_run_after {
                graph.must_run_after(name.as_str(), other.as_str());
            }
            for other in &task.should_run_after {
                graph.should_run_after(name.as_str(), other.as_str());
            }
            for finalizer in &task.finalized_by {
                graph.finalized_by(name.as_str(), finalizer.as_str());
            }
        }
        debug!(tasks = graph.len(), "built task graph from config");
        Ok(graph)
    }

    /// Engine options for a project rooted at `root` (the directory holding
    /// the build file). Relative paths in the config resolve against it.
    pub fn engine_options(&self, root: &Path) -> EngineOptions {
        let state_dir = self.state_dir(root);

        let cache = if let Some(local_dir) = self.local_cache_dir(root) {
            let mut cache = CacheOptions::local_dir(local_dir);
            cache.push_local = self.cache.push;
            if let Some(remote) = &self.cache.remote {
                let backend = RemoteCacheBackend::new(DirectoryTransport::new(root.join(&remote.dir)));
                cache = cache.with_remote(Arc::new(backend), remote.push);
            }
            cache
        } else {
            CacheOptions::disabled()
        };

        EngineOptions::new(root)
            .workers(self.engine.workers.unwrap_or_else(default_workers))
            .failure_policy(self.engine.failure_policy)
            .history(Arc::new(FileHistoryStore::new(&state_dir)))
            .cache(cache)
    }

    /// Directory holding the execution history.
    pub fn state_dir(&self, root: &Path) -> PathBuf {
        root.join(
            self.engine
                .state_dir
                .as_deref()
                .unwrap_or_else(|| Path::new(DEFAULT_STATE_DIR)),
        )
    }

    /// Local cache directory, or `None` when caching is off.
    pub fn local_cache_dir(&self, root: &Path) -> Option<PathBuf> {
        if !self.cache.enabled {
            return None;
        }
        Some(match &self.cache.dir {
            Some(dir) => root.join(dir),
            None => self.state_dir(root).join("cache"),
        })
    }
}

fn task_node(name: &str, task: &TaskConfig) -> Result<TaskNode> {
    let action = ShellAction::new(task.cmd.clone()).with_env(task.env.clone());
    let mut node = TaskNode::new(name, Arc::new(action))
        .cacheable(task.cacheable)
        .parallel(task.parallel);

    for (prop, cfg) in &task.inputs {
        node = node.input(cfg.to_spec(prop).map_err(CachedagError::ConfigError)?);
    }
    for (prop, cfg) in &task.outputs {
        node = node.output(cfg.to_spec(prop).map_err(CachedagError::ConfigError)?);
    }
    Ok(node)
}
