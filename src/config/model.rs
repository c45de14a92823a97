// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::types::FailurePolicy;

/// Build file exactly as read from TOML, before validation.
///
/// ```toml
/// [engine]
/// workers = 4
/// failure_policy = "fail-fast"
///
/// [cache]
/// dir = ".cachedag/cache"
///
/// [task.compile]
/// cmd = "cc -c src/main.c -o build/main.o"
/// cacheable = true
/// inputs.sources = { tree = "src", include = ["**/*.c", "**/*.h"] }
/// outputs.objects = { file = "build/main.o" }
///
/// [task.test]
/// cmd = "./run-tests.sh"
/// after = ["compile"]
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub cache: CacheSection,

    /// All tasks from `[task.<name>]`, keyed by task name. Declaration order
    /// of the resulting graph is the sorted order of the names.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// Validated build file. Only constructed through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineSection,
    pub cache: CacheSection,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        engine: EngineSection,
        cache: CacheSection,
        task: BTreeMap<String, TaskConfig>,
    ) -> Self {
        Self { engine, cache, task }
    }
}

/// `[engine]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    /// Worker count; defaults to the machine's available parallelism.
    #[serde(default)]
    pub workers: Option<usize>,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Where history and the default local cache live, relative to the
    /// directory holding the build file. Defaults to `.cachedag`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

/// `[cache]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Local cache directory; defaults to `<state_dir>/cache`.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Whether executed outputs are written to the local cache.
    #[serde(default = "default_true")]
    pub push: bool,

    #[serde(default)]
    pub remote: Option<RemoteCacheSection>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            push: true,
            remote: None,
        }
    }
}

/// `[cache.remote]`: a shared directory (e.g. a network mount) used as a
/// second cache tier.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteCacheSection {
    pub dir: PathBuf,

    #[serde(default)]
    pub push: bool,
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Shell command run from the project root.
    pub cmd: String,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub cacheable: bool,

    /// `false` makes the task run alone.
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Hard dependencies: these tasks run first and are pulled into the run.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub must_run_after: Vec<String>,

    #[serde(default)]
    pub should_run_after: Vec<String>,

    #[serde(default)]
    pub finalized_by: Vec<String>,

    #[serde(default)]
    pub inputs: BTreeMap<String, PropertyConfig>,

    #[serde(default)]
    pub outputs: BTreeMap<String, PropertyConfig>,
}

/// One input or output property. Exactly one of `file`, `tree`, `value` or
/// `values` must be set; `include`/`exclude` only apply to `tree`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyConfig {
    #[serde(default)]
    pub file: Option<PathBuf>,

    #[serde(default)]
    pub tree: Option<PathBuf>,

    #[serde(default)]
    pub include: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub value: Option<serde_json::Value>,

    #[serde(default)]
    pub values: Option<Vec<serde_json::Value>>,
}

fn default_true() -> bool {
    true
}
