//! On-disk output layout
//!
//! Every path the scheduler reads or writes below a sample's output root is
//! derived here so that the tracker, builder and pool agree on names:
//!
//! ```text
//! {output_root}/
//!     manifests/manifest_{seq}.txt
//!     job_{seq}.out
//!     job_{seq}.checkpoint
//!     job_{seq}.log
//!     job_{seq}.done
//!     BASECALLING_COMPLETE
//! ```

use std::path::{Path, PathBuf};

/// Default name of the manifest directory below the output root
pub const DEFAULT_MANIFEST_DIR: &str = "manifests";

/// File name of the per-sample completion sentinel
pub const SAMPLE_SENTINEL: &str = "BASECALLING_COMPLETE";

const MANIFEST_PREFIX: &str = "manifest_";
const MANIFEST_SUFFIX: &str = ".txt";

/// Path derivations for one sample's output root
#[derive(Debug, Clone, Copy)]
pub struct SampleLayout<'a> {
    root: &'a Path,
    manifest_dir: &'a str,
}

impl<'a> SampleLayout<'a> {
    pub fn new(root: &'a Path) -> Self {
        Self {
            root,
            manifest_dir: DEFAULT_MANIFEST_DIR,
        }
    }

    pub fn with_manifest_dir(mut self, manifest_dir: &'a str) -> Self {
        self.manifest_dir = manifest_dir;
        self
    }

    pub fn root(&self) -> &Path {
        self.root
    }

    pub fn manifest_dir(&self) -> PathBuf {
        self.root.join(self.manifest_dir)
    }

    pub fn manifest_path(&self, sequence: u64) -> PathBuf {
        self.manifest_dir()
            .join(format!("{}{}{}", MANIFEST_PREFIX, sequence, MANIFEST_SUFFIX))
    }

    /// Hidden staging file a manifest is written to before being renamed
    pub fn manifest_staging_path(&self, sequence: u64) -> PathBuf {
        self.manifest_dir().join(format!(
            ".{}{}{}.tmp",
            MANIFEST_PREFIX, sequence, MANIFEST_SUFFIX
        ))
    }

    pub fn output_path(&self, sequence: u64) -> PathBuf {
        self.root.join(format!("job_{}.out", sequence))
    }

    pub fn checkpoint_path(&self, sequence: u64) -> PathBuf {
        self.root.join(format!("job_{}.checkpoint", sequence))
    }

    pub fn log_path(&self, sequence: u64) -> PathBuf {
        self.root.join(format!("job_{}.log", sequence))
    }

    pub fn done_path(&self, sequence: u64) -> PathBuf {
        self.root.join(format!("job_{}.done", sequence))
    }

    pub fn sample_sentinel(&self) -> PathBuf {
        self.root.join(SAMPLE_SENTINEL)
    }

    pub fn is_complete(&self) -> bool {
        self.sample_sentinel().is_file()
    }
}

/// Extracts the sequence number from a manifest file name.
///
/// Returns `None` for anything that is not exactly `manifest_{seq}.txt`,
/// including staging files.
pub fn parse_manifest_sequence(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix(MANIFEST_PREFIX)?
        .strip_suffix(MANIFEST_SUFFIX)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_stable_per_sequence() {
        let root = PathBuf::from("/out/S1/basecalls");
        let layout = SampleLayout::new(&root);

        assert_eq!(
            layout.manifest_path(2),
            PathBuf::from("/out/S1/basecalls/manifests/manifest_2.txt")
        );
        assert_eq!(layout.output_path(2), PathBuf::from("/out/S1/basecalls/job_2.out"));
        assert_eq!(
            layout.checkpoint_path(2),
            PathBuf::from("/out/S1/basecalls/job_2.checkpoint")
        );
        assert_eq!(layout.done_path(2), PathBuf::from("/out/S1/basecalls/job_2.done"));
        assert_eq!(
            layout.sample_sentinel(),
            PathBuf::from("/out/S1/basecalls/BASECALLING_COMPLETE")
        );
    }

    #[test]
    fn test_custom_manifest_dir() {
        let root = PathBuf::from("/out");
        let layout = SampleLayout::new(&root).with_manifest_dir("tmp");
        assert_eq!(layout.manifest_path(0), PathBuf::from("/out/tmp/manifest_0.txt"));
    }

    #[test]
    fn test_parse_manifest_sequence() {
        assert_eq!(parse_manifest_sequence("manifest_0.txt"), Some(0));
        assert_eq!(parse_manifest_sequence("manifest_17.txt"), Some(17));
        assert_eq!(parse_manifest_sequence(".manifest_3.txt.tmp"), None);
        assert_eq!(parse_manifest_sequence("manifest_x.txt"), None);
        assert_eq!(parse_manifest_sequence("job_1.out"), None);
    }

    #[test]
    fn test_staging_path_is_not_a_manifest() {
        let root = PathBuf::from("/out");
        let layout = SampleLayout::new(&root);
        let staging = layout.manifest_staging_path(5);
        let name = staging.file_name().unwrap().to_str().unwrap();
        assert_eq!(parse_manifest_sequence(name), None);
    }
}
