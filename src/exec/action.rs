// src/exec/action.rs

//! The opaque unit of work attached to a task node.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;

use crate::types::TaskId;

/// Execution context handed to a running action.
#[derive(Clone)]
pub struct ActionContext {
    pub task: TaskId,
    pub root_dir: PathBuf,
    /// Cooperative cancellation. Actions check it at their own checkpoints;
    /// the engine never kills a running action.
    pub cancellation_token: CancellationToken,
}

impl ActionContext {
    pub fn new(task: TaskId, root_dir: impl Into<PathBuf>, cancellation_token: CancellationToken) -> Self {
        Self {
            task,
            root_dir: root_dir.into(),
            cancellation_token,
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Fail with an error if cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            bail!("task '{}' was cancelled", self.task);
        }
        Ok(())
    }
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("task", &self.task)
            .field("root_dir", &self.root_dir)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A task's action.
///
/// `run` executes on a blocking worker thread and may do arbitrary IO, but
/// should only write to the task's declared outputs. `identity` describes
/// the action's implementation; any change to it invalidates history and
/// cache entries recorded for the old identity.
pub trait TaskAction: Send + Sync {
    fn run(&self, ctx: &ActionContext) -> Result<()>;
    fn identity(&self) -> String;
}

type ActionFn = dyn Fn(&ActionContext) -> Result<()> + Send + Sync;

/// An action backed by a closure with an explicit identity.
pub struct FnAction {
    identity: String,
    f: Box<ActionFn>,
}

impl FnAction {
    pub fn new<F>(identity: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ActionContext) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            identity: identity.into(),
            f: Box::new(f),
        }
    }
}

impl TaskAction for FnAction {
    fn run(&self, ctx: &ActionContext) -> Result<()> {
        (self.f)(ctx)
    }

    fn identity(&self) -> String {
        self.identity.clone()
    }
}

impl fmt::Debug for FnAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAction")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
