//! Error types for the scheduler

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors raised by scheduler components
///
/// Job execution failures are not errors: they are reported as a failed
/// `JobResult`. Manifests referencing vanished input units are logged as
/// warnings during recovery.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Watched root is missing or unreadable
    #[error("Cannot read watched directory {}: {source}", .path.display())]
    Discovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Sample list file is unreadable or names an unusable directory
    #[error("Invalid sample list {}: {reason}", .path.display())]
    InvalidSampleList { path: PathBuf, reason: String },

    /// Prior job manifests could not be read back
    #[error("Failed to recover manifests from {}: {source}", .path.display())]
    Recovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A sample's output directory could not be created
    #[error("Failed to prepare output directory {}: {source}", .path.display())]
    OutputSetup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Durable write of a job manifest failed
    #[error("Failed to write manifest {}: {source}", .path.display())]
    ManifestWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A partial output could not be turned into a checkpoint
    #[error("Failed to prepare checkpoint {}: {source}", .path.display())]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A completion sentinel could not be written
    #[error("Failed to write sentinel {}: {source}", .path.display())]
    Sentinel {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SchedulerError {
    /// Whether the error aborts the whole run rather than one sample's round
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Discovery { .. }
                | Self::InvalidSampleList { .. }
                | Self::Recovery { .. }
                | Self::OutputSetup { .. }
        )
    }

    /// Path the failing operation was working on
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Discovery { path, .. }
            | Self::InvalidSampleList { path, .. }
            | Self::Recovery { path, .. }
            | Self::OutputSetup { path, .. }
            | Self::ManifestWrite { path, .. }
            | Self::Checkpoint { path, .. }
            | Self::Sentinel { path, .. } => path,
        }
    }
}
