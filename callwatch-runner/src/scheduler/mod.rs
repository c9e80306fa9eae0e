//! Scheduler layer
//!
//! This layer runs the top-level control loop: discovering samples,
//! recovering their state from earlier runs, repeatedly building and
//! dispatching jobs, and deciding when to stop polling.

pub mod run_loop;

pub use run_loop::{RunSummary, Scheduler, SchedulerState, StopHandle, TerminationReason};
