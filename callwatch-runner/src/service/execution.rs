//! Execution service
//!
//! Runs a job's external processing command on one device slot:
//! - Rendering the command template for the slot's device
//! - Redirecting stdout into the job output and stderr into the job log
//! - Waiting for the process and mapping its exit status onto a result
//!
//! Commands are spawned directly from an argument list, never via a shell,
//! each in its own process group so signals sent to the scheduler's group
//! never interrupt a running job.

use anyhow::{Context, Result};
use async_trait::async_trait;
use callwatch_core::domain::{CommandSpec, DeviceSlot, Job, JobResult};
use std::fs::File;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info};

/// Service trait for executing jobs
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Executes a job to completion on the given slot
    ///
    /// # Arguments
    /// * `job` - The job to run
    /// * `slot` - The device slot the job is bound to
    ///
    /// # Returns
    /// The job result (success only on exit code 0)
    async fn execute(&self, job: &Job, slot: &DeviceSlot) -> JobResult;
}

/// Runs jobs as local child processes
#[derive(Debug, Default)]
pub struct ProcessExecutionService {}

impl ProcessExecutionService {
    /// Creates a new process execution service
    pub fn new() -> Self {
        Self {}
    }

    /// Builds the child process with its output redirections
    fn prepare(&self, spec: &CommandSpec, job: &Job) -> Result<Command> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args).stdin(Stdio::null());

        // Own process group: a terminal Ctrl-C reaches the scheduler only,
        // which then stops after the running jobs finish
        #[cfg(unix)]
        command.process_group(0);

        match &spec.stdout_path {
            Some(path) => {
                let file = File::create(path)
                    .with_context(|| format!("Failed to create output file {}", path.display()))?;
                command.stdout(Stdio::from(file));
            }
            None => {
                command.stdout(Stdio::null());
            }
        }

        let log = File::create(&job.log_path)
            .with_context(|| format!("Failed to create log file {}", job.log_path.display()))?;
        command.stderr(Stdio::from(log));

        Ok(command)
    }
}

#[async_trait]
impl ExecutionService for ProcessExecutionService {
    async fn execute(&self, job: &Job, slot: &DeviceSlot) -> JobResult {
        let spec = job.command.render(job, &slot.device);
        info!("Starting job {} on {}", job.label(), slot);
        debug!("Command: {}", spec);

        let mut command = match self.prepare(&spec, job) {
            Ok(command) => command,
            Err(e) => {
                error!("Failed to prepare job {}: {:#}", job.label(), e);
                return JobResult::failed(-1, format!("{:#}", e));
            }
        };

        match command.status().await {
            Ok(status) => {
                debug!("Job {} exited with {}", job.label(), status);
                JobResult::from_exit_code(status.code())
            }
            Err(e) => {
                error!(
                    "Failed to run {} for job {}: {}",
                    spec.program.display(),
                    job.label(),
                    e
                );
                JobResult::failed(
                    -1,
                    format!("Failed to execute {}: {}", spec.program.display(), e),
                )
            }
        }
    }
}
