//! Service layer
//!
//! Services sit at the seams of the scheduler: running the external
//! processing command for a job, and reporting finished jobs to whoever
//! drives the scheduler.
//!
//! All services are trait-based to enable testing and dependency injection.

mod execution;
mod reporter;

// Re-export traits
pub use execution::ExecutionService;
pub use reporter::CompletionReporter;

// Re-export implementations
pub use execution::ProcessExecutionService;
pub use reporter::TracingReporter;
