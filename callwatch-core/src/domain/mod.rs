//! Core domain types
//!
//! This module contains the structures shared by every scheduler component.
//! They describe what is being processed (samples and their input units),
//! how it is packaged (jobs and command templates) and where it runs
//! (device slots).

pub mod command;
pub mod device;
pub mod job;
pub mod sample;

pub use command::{CommandSpec, CommandTemplate};
pub use device::DeviceSlot;
pub use job::{Job, JobReport, JobResult, JobStatus};
pub use sample::{InputUnit, Sample};
