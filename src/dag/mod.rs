// src/dag/mod.rs

//! Task graph representation and scheduling.
//!
//! - [`graph`] holds the producer-facing [`TaskGraph`] and the validated
//!   [`FinalizedGraph`].
//! - [`scheduler`] contains the per-run state machine that decides
//!   which nodes are ready to run, and when dependents can be scheduled.
//! - [`task_info`] provides per-run node state and dispatch types.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] applies readiness and cancellation rules.

pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod task_info;

pub use graph::{DeclaredEdge, FinalizedGraph, TaskGraph, TaskNode};
pub use scheduler::{default_workers, Scheduler, SchedulerOptions};
pub use scheduler_step::SchedulerStep;
pub use task_info::{NodeOutcome, ScheduledNode};
