//! Callwatch Runner
//!
//! An incremental batch-job scheduler for sequencing runs that are still
//! producing data.
//!
//! Architecture:
//! - Configuration: Scheduler tunables and the processing command
//! - Watcher: Sample discovery and eligibility below a watched root
//! - Tracker: Claimed input units and job sequences per sample
//! - Builder: Manifests, checkpoints and completion sentinels
//! - Pool: Device-bound worker slots draining a job queue
//! - Scheduler: The discover / prime / drain / idle state machine
//!
//! Each round the scheduler diffs every sample's input directory against the
//! units already claimed, writes a manifest for the new ones and runs one job
//! per sample on the next free device. State survives restarts through the
//! manifests on disk.

pub mod builder;
pub mod config;
pub mod pool;
pub mod scheduler;
pub mod service;
pub mod shutdown;
pub mod tracker;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use config::{Config, SampleSource};
pub use scheduler::{RunSummary, Scheduler, SchedulerState, StopHandle, TerminationReason};
pub use service::{CompletionReporter, ExecutionService, ProcessExecutionService, TracingReporter};
