//! Device slot domain model
//!
//! A device slot is one fixed execution context bound to one accelerator.

use serde::{Deserialize, Serialize};

/// One of N fixed hardware execution contexts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSlot {
    /// Position of the slot in the pool
    pub index: usize,

    /// Device identity handed to the processing command (e.g. "cuda:0")
    pub device: String,
}

impl DeviceSlot {
    /// Builds the slot table for a pool of `count` slots.
    ///
    /// Slot `i` is always bound to `"{prefix}{i}"`.
    pub fn table(prefix: &str, count: usize) -> Vec<DeviceSlot> {
        (0..count)
            .map(|index| DeviceSlot {
                index,
                device: format!("{}{}", prefix, index),
            })
            .collect()
    }
}

impl std::fmt::Display for DeviceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot {} ({})", self.index, self.device)
    }
}
