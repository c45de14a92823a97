// src/types.rs

//! Small shared vocabulary types used across the graph, scheduler and engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stable identity of a task node, e.g. `:app:compile`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Kind of an ordering edge between two task nodes.
///
/// Strict edges (`HardDependency`, `MustRunAfter`, and the ordering derived
/// from `FinalizedBy`) must form an acyclic graph. `ShouldRunAfter` is
/// advisory and is dropped when it would close a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    HardDependency,
    MustRunAfter,
    ShouldRunAfter,
    FinalizedBy,
}

impl EdgeKind {
    /// Whether a failed or cancelled predecessor over this edge cancels the
    /// successor.
    pub fn propagates_failure(self) -> bool {
        matches!(self, EdgeKind::HardDependency | EdgeKind::MustRunAfter)
    }
}

/// Execution state of a node during a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Skipped,
    FromCache,
    Succeeded,
    Failed,
    Cancelled,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeState::Skipped
                | NodeState::FromCache
                | NodeState::Succeeded
                | NodeState::Failed
                | NodeState::Cancelled
        )
    }

    /// SUCCEEDED, SKIPPED and FROM_CACHE all count as a successful node.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            NodeState::Skipped | NodeState::FromCache | NodeState::Succeeded
        )
    }

    pub fn is_unsuccessful(self) -> bool {
        matches!(self, NodeState::Failed | NodeState::Cancelled)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Pending => "PENDING",
            NodeState::Ready => "READY",
            NodeState::Running => "RUNNING",
            NodeState::Skipped => "UP-TO-DATE",
            NodeState::FromCache => "FROM-CACHE",
            NodeState::Succeeded => "EXECUTED",
            NodeState::Failed => "FAILED",
            NodeState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// What the scheduler does after the first node failure.
///
/// - `Drain`: stop dispatching new nodes, let running nodes finish.
/// - `Continue`: keep running everything that does not depend on a failure.
/// - `FailFast`: like `Drain`, and running nodes are signalled to cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    #[default]
    Drain,
    Continue,
    FailFast,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drain" => Ok(FailurePolicy::Drain),
            "continue" => Ok(FailurePolicy::Continue),
            "fail-fast" | "fail_fast" | "failfast" => Ok(FailurePolicy::FailFast),
            other => Err(format!(
                "invalid failure_policy: {other} (expected \"drain\", \"continue\" or \"fail-fast\")"
            )),
        }
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Succeeded => f.write_str("BUILD SUCCESSFUL"),
            RunOutcome::Failed => f.write_str("BUILD FAILED"),
        }
    }
}
