#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use cachedag::config::{
    CacheSection, ConfigFile, EngineSection, PropertyConfig, RawConfigFile, RemoteCacheSection,
    TaskConfig,
};
use cachedag::dag::{FinalizedGraph, TaskGraph, TaskNode};
use cachedag::errors::Result;
use cachedag::exec::TaskAction;
use cachedag::fingerprint::PropertySpec;
use cachedag::types::FailurePolicy;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                engine: EngineSection::default(),
                cache: CacheSection::default(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.engine.workers = Some(workers);
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.engine.failure_policy = policy;
        self
    }

    pub fn state_dir(mut self, dir: &str) -> Self {
        self.config.engine.state_dir = Some(PathBuf::from(dir));
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache.enabled = enabled;
        self
    }

    pub fn remote_cache(mut self, dir: &str, push: bool) -> Self {
        self.config.cache.remote = Some(RemoteCacheSection {
            dir: PathBuf::from(dir),
            push,
        });
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: cmd.to_string(),
                env: BTreeMap::new(),
                cacheable: false,
                parallel: true,
                after: vec![],
                must_run_after: vec![],
                should_run_after: vec![],
                finalized_by: vec![],
                inputs: BTreeMap::new(),
                outputs: BTreeMap::new(),
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn must_run_after(mut self, other: &str) -> Self {
        self.task.must_run_after.push(other.to_string());
        self
    }

    pub fn should_run_after(mut self, other: &str) -> Self {
        self.task.should_run_after.push(other.to_string());
        self
    }

    pub fn finalized_by(mut self, finalizer: &str) -> Self {
        self.task.finalized_by.push(finalizer.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.task.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn cacheable(mut self, val: bool) -> Self {
        self.task.cacheable = val;
        self
    }

    pub fn parallel(mut self, val: bool) -> Self {
        self.task.parallel = val;
        self
    }

    pub fn input(mut self, name: &str, prop: PropertyConfig) -> Self {
        self.task.inputs.insert(name.to_string(), prop);
        self
    }

    pub fn output(mut self, name: &str, prop: PropertyConfig) -> Self {
        self.task.outputs.insert(name.to_string(), prop);
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// `{ file = path }`
pub fn file_prop(path: &str) -> PropertyConfig {
    PropertyConfig {
        file: Some(PathBuf::from(path)),
        ..PropertyConfig::default()
    }
}

/// `{ tree = root, include = [...] }`
pub fn tree_prop(root: &str, include: &[&str]) -> PropertyConfig {
    PropertyConfig {
        tree: Some(PathBuf::from(root)),
        include: include.iter().map(|s| s.to_string()).collect(),
        ..PropertyConfig::default()
    }
}

/// `{ value = v }`
pub fn value_prop(value: serde_json::Value) -> PropertyConfig {
    PropertyConfig {
        value: Some(value),
        ..PropertyConfig::default()
    }
}

/// Builder for graphs of in-process actions.
///
/// Edges are given as `(task, other)` in the same direction as the
/// `TaskGraph` helpers: `depends_on("test", "compile")` means compile runs
/// first.
pub struct GraphBuilder {
    graph: TaskGraph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            graph: TaskGraph::new(),
        }
    }

    pub fn task(mut self, node: TaskNode) -> Self {
        self.graph.add_task(node).expect("duplicate task in test graph");
        self
    }

    /// Plain task with no inputs or outputs.
    pub fn action(self, name: &str, action: Arc<dyn TaskAction>) -> Self {
        self.task(TaskNode::new(name, action))
    }

    pub fn depends_on(mut self, task: &str, dependency: &str) -> Self {
        self.graph.depends_on(task, dependency);
        self
    }

    pub fn must_run_after(mut self, task: &str, other: &str) -> Self {
        self.graph.must_run_after(task, other);
        self
    }

    pub fn should_run_after(mut self, task: &str, other: &str) -> Self {
        self.graph.should_run_after(task, other);
        self
    }

    pub fn finalized_by(mut self, task: &str, finalizer: &str) -> Self {
        self.graph.finalized_by(task, finalizer);
        self
    }

    pub fn request(mut self, task: &str) -> Self {
        self.graph.request(task);
        self
    }

    pub fn into_graph(self) -> TaskGraph {
        self.graph
    }

    pub fn build(self) -> FinalizedGraph {
        self.graph.finalize().expect("test graph should finalize")
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A node whose only input is a value, useful for forcing re-execution by
/// changing `value`.
pub fn value_node(name: &str, action: Arc<dyn TaskAction>, value: &str) -> TaskNode {
    TaskNode::new(name, action).input(PropertySpec::value("param", value))
}
