// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - handing `ScheduledNode`s to the executor backend
//! - forwarding cancellation to running nodes
//!
//! The core is intended to be unit tested without any Tokio, channels,
//! filesystem, or processes.

use crate::dag::Scheduler;
use crate::engine::event_handlers::{
    handle_cancel_requested, handle_node_finished, handle_start, CoreStep,
};
use crate::engine::RuntimeEvent;

/// Pure core runtime state.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn into_scheduler(self) -> Scheduler {
        self.scheduler
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Start the run and return the first batch of commands.
    pub fn start(&mut self) -> CoreStep {
        handle_start(&mut self.scheduler)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: &RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::NodeFinished { index, execution } => {
                handle_node_finished(&mut self.scheduler, *index, execution.outcome)
            }
            RuntimeEvent::CancelRequested => handle_cancel_requested(&mut self.scheduler),
        }
    }
}
