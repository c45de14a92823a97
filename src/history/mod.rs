// src/history/mod.rs

//! Per-task execution history.
//!
//! The history store keeps the most recent successful execution of every
//! task. The engine compares it against the current input and output
//! fingerprints to decide whether a task is up to date.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::HistoryError;
use crate::fingerprint::{Digest, Fingerprint, TreeContents};
use crate::types::TaskId;

pub mod file;
pub mod memory;

pub use file::FileHistoryStore;
pub use memory::MemoryHistoryStore;

/// How the recorded outputs were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordedOutcome {
    Executed,
    FromCache,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub task: TaskId,
    pub action_identity: Digest,
    pub inputs: Fingerprint,
    pub outputs: Fingerprint,
    /// Tree output files this task produced. Anything else found under its
    /// tree outputs before the next execution belongs to someone else.
    #[serde(default, skip_serializing_if = "TreeContents::is_empty")]
    pub owned_outputs: TreeContents,
    pub outcome: RecordedOutcome,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Storage for execution records.
///
/// `lookup` never fails: unreadable or corrupt records are reported through
/// logging and read as "no history".
pub trait HistoryStore: Send + Sync + Debug {
    fn lookup(&self, task: &TaskId) -> Option<ExecutionRecord>;
    fn record(&self, task: &TaskId, record: ExecutionRecord) -> Result<(), HistoryError>;
    fn remove(&self, task: &TaskId) -> Result<(), HistoryError>;
    /// Remove records of tasks that are not in `active`. Returns how many
    /// records were removed.
    fn prune(&self, active: &[TaskId]) -> Result<usize, HistoryError>;
}
