//! Callwatch Core
//!
//! Core types and abstractions for the callwatch incremental basecall scheduler.
//!
//! This crate contains:
//! - Domain types: Samples, input units, jobs, device slots and command templates
//! - Layout: The on-disk naming contract for manifests, outputs and sentinels
//! - Errors: The scheduler error taxonomy

pub mod domain;
pub mod error;
pub mod layout;

pub use error::{Result, SchedulerError};
