// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`action`] defines what a task does ([`TaskAction`]) and the context it
//!   runs with.
//! - [`shell`] provides [`ShellAction`], the action used for tasks declared
//!   in configuration.
//! - [`backend`] provides the `ExecutorBackend` trait and the concrete
//!   [`WorkerPool`] that the runtime uses in production, and which tests can
//!   replace with a fake implementation.

pub mod action;
pub mod backend;
pub mod shell;

pub use action::{ActionContext, FnAction, TaskAction};
pub use backend::{ExecutorBackend, WorkerPool};
pub use shell::ShellAction;
