//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::command::CommandTemplate;
use super::device::DeviceSlot;

/// One dispatchable unit of processing work
///
/// Built by the job builder once its manifest is durable, then owned by the
/// queue until a worker slot picks it up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub sample_id: String,
    /// Monotonically increasing per sample, gapless across restarts
    pub sequence: u64,
    /// 1 for the first execution, incremented on every retry
    pub attempt: u32,
    pub input_root: PathBuf,
    pub manifest_path: PathBuf,
    pub output_path: PathBuf,
    /// Partial output of an earlier attempt to resume from
    pub checkpoint_path: Option<PathBuf>,
    /// Receives the processing command's stderr
    pub log_path: PathBuf,
    /// Written on success only
    pub done_path: PathBuf,
    pub command: CommandTemplate,
}

impl Job {
    /// Human readable identity used in logs
    pub fn label(&self) -> String {
        format!("{}#{}", self.sample_id, self.sequence)
    }

    pub fn is_resume(&self) -> bool {
        self.checkpoint_path.is_some()
    }
}

/// Terminal job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Succeeded,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Succeeded => write!(f, "Succeeded"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Result of a job execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    /// Process exit code, -1 when the process never ran or died from a signal
    pub exit_code: i32,
    pub error_message: Option<String>,
}

impl JobResult {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            exit_code: 0,
            error_message: None,
        }
    }

    pub fn failed(exit_code: i32, message: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code,
            error_message: Some(message.into()),
        }
    }

    /// Maps a raw exit code onto a result; only 0 counts as success.
    pub fn from_exit_code(exit_code: Option<i32>) -> Self {
        match exit_code {
            Some(0) => Self::succeeded(),
            Some(code) => Self::failed(code, format!("process exited with code {}", code)),
            None => Self::failed(-1, "process terminated by signal"),
        }
    }

    pub fn status(&self) -> JobStatus {
        if self.success {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed
        }
    }
}

/// Completion record for one finished job
///
/// Handed to the completion reporter and stored as the per-job sentinel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub sample_id: String,
    pub sequence: u64,
    pub attempt: u32,
    pub slot: usize,
    pub device: String,
    pub result: JobResult,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl JobReport {
    pub fn new(job: &Job, slot: &DeviceSlot, result: JobResult, started_at: DateTime<Utc>) -> Self {
        Self {
            sample_id: job.sample_id.clone(),
            sequence: job.sequence,
            attempt: job.attempt,
            slot: slot.index,
            device: slot.device.clone(),
            result,
            started_at,
            completed_at: Utc::now(),
        }
    }

    pub fn success(&self) -> bool {
        self.result.success
    }

    pub fn status(&self) -> JobStatus {
        self.result.status()
    }
}
