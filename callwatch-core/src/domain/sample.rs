//! Sample domain types

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::layout::{DEFAULT_MANIFEST_DIR, SampleLayout};

/// One logical acquisition unit with its own growing set of input files.
///
/// Created when a sample directory is first observed eligible and kept for
/// the remainder of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Stable identifier, the sample directory name
    pub id: String,

    /// Directory holding the raw input units
    pub input_root: PathBuf,

    /// Directory receiving manifests, outputs, checkpoints and sentinels
    pub output_root: PathBuf,

    /// Name of the manifest directory below `output_root`
    pub manifest_dir: String,
}

impl Sample {
    pub fn new(
        id: impl Into<String>,
        input_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            input_root: input_root.into(),
            output_root: output_root.into(),
            manifest_dir: DEFAULT_MANIFEST_DIR.to_string(),
        }
    }

    pub fn with_manifest_dir(mut self, manifest_dir: impl Into<String>) -> Self {
        self.manifest_dir = manifest_dir.into();
        self
    }

    /// The acquisition run directory, the parent of the raw input directory.
    ///
    /// Run-level files such as the final summary written at the end of
    /// acquisition live here.
    pub fn run_dir(&self) -> &Path {
        self.input_root.parent().unwrap_or(&self.input_root)
    }

    /// On-disk layout of this sample's outputs
    pub fn layout(&self) -> SampleLayout<'_> {
        SampleLayout::new(&self.output_root).with_manifest_dir(&self.manifest_dir)
    }
}

/// One atomic chunk of raw data belonging to exactly one sample.
///
/// The scheduler only ever reads unit metadata, never the unit itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputUnit {
    pub name: String,
    pub size_bytes: u64,
}

impl InputUnit {
    pub fn new(name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            size_bytes,
        }
    }

    /// Whether the producer has finished writing this unit.
    ///
    /// A zero-length unit has been created but not yet flushed.
    pub fn is_complete(&self) -> bool {
        self.size_bytes > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_dir_is_parent_of_input_root() {
        let sample = Sample::new("S1", "/data/exp/S1/run_a/pod5", "/data/exp/S1/basecalls");
        assert_eq!(sample.run_dir(), Path::new("/data/exp/S1/run_a"));
    }

    #[test]
    fn test_zero_length_unit_is_incomplete() {
        assert!(!InputUnit::new("a.pod5", 0).is_complete());
        assert!(InputUnit::new("a.pod5", 42).is_complete());
    }
}
