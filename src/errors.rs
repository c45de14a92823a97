// src/errors.rs

//! Crate-wide error types.
//!
//! Graph-scoped errors (`GraphError`) abort a run before anything executes.
//! Node-scoped errors (`NodeError`) fail a single node. Cache and history
//! errors never fail a build; the engine logs them and degrades to a miss.

use std::path::PathBuf;

use thiserror::Error;

use crate::cache::CacheKey;
use crate::types::TaskId;

#[derive(Error, Debug)]
pub enum CachedagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised while building or finalizing a task graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("task '{0}' is declared more than once")]
    DuplicateTask(TaskId),

    #[error("task '{from}' has an edge to unknown task '{to}'")]
    UnknownTask { from: TaskId, to: TaskId },

    #[error("requested task '{0}' is not part of the graph")]
    UnknownEntry(TaskId),

    #[error("cycle detected in task graph: {}", format_cycle(.path))]
    Cycle { path: Vec<TaskId> },
}

fn format_cycle(path: &[TaskId]) -> String {
    path.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors raised while fingerprinting declared properties.
#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("cannot read input property '{property}' at {path:?}: {source}")]
    InputUnreadable {
        property: String,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("cannot read output property '{property}' at {path:?}: {source}")]
    OutputUnreadable {
        property: String,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid glob pattern in property '{property}': {source}")]
    Pattern {
        property: String,
        #[source]
        source: globset::Error,
    },

    #[error("cannot serialize value property '{property}': {source}")]
    Value {
        property: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Why a single node ended up FAILED.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    InputUnreadable(FingerprintError),

    #[error("cannot clean previous outputs before execution: {0:#}")]
    OutputCleanup(anyhow::Error),

    #[error("task action failed: {0:#}")]
    ActionFailed(anyhow::Error),

    #[error("cannot fingerprint outputs after execution: {0}")]
    OutputUnreadable(#[source] FingerprintError),

    #[error("task action panicked: {0}")]
    Panicked(String),
}

impl NodeError {
    /// The original error returned by the task action, if that is what
    /// failed the node.
    pub fn action_error(&self) -> Option<&anyhow::Error> {
        match self {
            NodeError::ActionFailed(err) => Some(err),
            _ => None,
        }
    }
}

/// History store failures. None of these fail a build.
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("history IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt history record at {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("history record at {path:?} has unsupported format version {found}")]
    UnsupportedVersion { path: PathBuf, found: u32 },

    #[error("cannot encode history record: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Cache backend failures. The engine treats every one of these as a miss.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache entry {key}: {reason}")]
    Corrupt { key: CacheKey, reason: String },

    #[error("cache backend unavailable: {0:#}")]
    Unavailable(anyhow::Error),

    #[error("cannot encode cache entry {key}: {reason}")]
    Encode { key: CacheKey, reason: String },
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CachedagError>;
