//! Directory watcher
//!
//! Lists the samples below a watched root and decides which of them this
//! scheduler may process. A sample is eligible when its tree contains the raw
//! input directory, and ineligible when it contains the directory another
//! consumer (the instrument's own live basecaller) writes into. The claimed
//! marker always wins so data owned by another tool is never processed twice.

use callwatch_core::domain::{InputUnit, Sample};
use callwatch_core::{Result, SchedulerError};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;

/// Classification of one sample directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    /// Raw input found at the given directory
    Eligible(PathBuf),

    /// Another consumer already owns this sample's data
    Claimed,

    /// No input directory yet
    NoInput,
}

/// Watches a root directory for eligible samples
pub struct DirectoryWatcher {
    raw_input_dir: String,
    claimed_input_dir: String,
    probe_depth: usize,
    interval: Duration,
    output_root: Option<PathBuf>,
    output_subdir: String,
    manifest_dir: String,
    run_complete_prefix: Option<String>,
}

impl DirectoryWatcher {
    pub fn new(config: &Config) -> Self {
        Self {
            raw_input_dir: config.raw_input_dir.clone(),
            claimed_input_dir: config.claimed_input_dir.clone(),
            probe_depth: config.probe_depth,
            interval: config.discovery_interval,
            output_root: config.output_root.clone(),
            output_subdir: config.output_subdir.clone(),
            manifest_dir: config.manifest_dir.clone(),
            run_complete_prefix: config.run_complete_prefix.clone(),
        }
    }

    /// Classifies a sample directory by probing for the input directories
    pub fn classify(&self, sample_dir: &Path) -> Eligibility {
        let mut raw_input = None;
        let mut entries = WalkDir::new(sample_dir)
            .min_depth(1)
            .max_depth(self.probe_depth)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry below {}: {}", sample_dir.display(), e);
                    continue;
                }
            };

            if !entry.file_type().is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            if name == self.claimed_input_dir.as_str() {
                return Eligibility::Claimed;
            }

            if name == self.raw_input_dir.as_str() {
                if raw_input.is_none() {
                    raw_input = Some(entry.path().to_path_buf());
                }
                // Input directories hold thousands of files, never descend
                entries.skip_current_dir();
            }
        }

        match raw_input {
            Some(path) => Eligibility::Eligible(path),
            None => Eligibility::NoInput,
        }
    }

    /// Lists the eligible samples directly below `root`
    ///
    /// # Returns
    /// Sample id -> raw input directory, ordered by sample id
    pub fn scan(&self, root: &Path) -> Result<BTreeMap<String, PathBuf>> {
        let entries = std::fs::read_dir(root).map_err(|source| SchedulerError::Discovery {
            path: root.to_path_buf(),
            source,
        })?;

        let mut eligible = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|source| SchedulerError::Discovery {
                path: root.to_path_buf(),
                source,
            })?;

            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let id = entry.file_name().to_string_lossy().into_owned();
            if !is_dir || id.starts_with('.') {
                continue;
            }

            match self.classify(&entry.path()) {
                Eligibility::Eligible(input_root) => {
                    debug!("Sample {} is eligible (input: {})", id, input_root.display());
                    eligible.insert(id, input_root);
                }
                Eligibility::Claimed => {
                    debug!("Sample {} is already claimed by another consumer", id);
                }
                Eligibility::NoInput => {
                    debug!("Sample {} has no input yet", id);
                }
            }
        }

        debug!("Scanned {}: {} eligible sample(s)", root.display(), eligible.len());
        Ok(eligible)
    }

    /// Waits until eligible samples exist below `root`
    ///
    /// Returns as soon as at least one sample is eligible, keeping at most
    /// `cap` of them in sample id order. Scans repeat every discovery
    /// interval until then.
    ///
    /// # Returns
    /// The discovered samples, or `None` if `token` was cancelled first
    pub async fn discover(
        &self,
        root: &Path,
        cap: usize,
        token: &CancellationToken,
    ) -> Result<Option<Vec<Sample>>> {
        loop {
            if token.is_cancelled() {
                return Ok(None);
            }

            let eligible = self.scan(root)?;
            if !eligible.is_empty() {
                let samples: Vec<Sample> = eligible
                    .into_iter()
                    .take(cap)
                    .map(|(id, input_root)| self.sample(root, &id, input_root))
                    .collect();
                info!("Discovered {} sample(s) under {}", samples.len(), root.display());
                return Ok(Some(samples));
            }

            info!(
                "No eligible samples under {} yet, checking again in {:?}",
                root.display(),
                self.interval
            );

            tokio::select! {
                _ = token.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Loads samples from a list file, one sample directory per line
    ///
    /// Blank lines and lines starting with `#` are ignored. Ineligible and
    /// duplicate entries are skipped with a warning.
    pub fn load_sample_list(&self, list_path: &Path, cap: usize) -> Result<Vec<Sample>> {
        let invalid = |reason: String| SchedulerError::InvalidSampleList {
            path: list_path.to_path_buf(),
            reason,
        };

        let content = std::fs::read_to_string(list_path).map_err(|e| invalid(e.to_string()))?;

        let mut seen = HashSet::new();
        let mut samples = Vec::new();
        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let sample_dir = PathBuf::from(line);
            if !sample_dir.is_dir() {
                return Err(invalid(format!("{} is not a directory", line)));
            }

            let Some(id) = sample_dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                return Err(invalid(format!("{} has no directory name", line)));
            };

            if !seen.insert(id.clone()) {
                warn!("Skipping duplicate sample {} ({})", id, line);
                continue;
            }

            match self.classify(&sample_dir) {
                Eligibility::Eligible(input_root) => {
                    let parent = sample_dir.parent().unwrap_or(Path::new("/"));
                    samples.push(self.sample(parent, &id, input_root));
                }
                Eligibility::Claimed => {
                    warn!("Skipping sample {}: already claimed by another consumer", id);
                }
                Eligibility::NoInput => {
                    warn!("Skipping sample {}: no {} directory", id, self.raw_input_dir);
                }
            }
        }

        if samples.len() > cap {
            warn!("Sample list names {} samples, keeping the first {}", samples.len(), cap);
            samples.truncate(cap);
        }

        info!("Loaded {} sample(s) from {}", samples.len(), list_path.display());
        Ok(samples)
    }

    /// Builds the sample record for `root/id`
    pub fn sample(&self, root: &Path, id: &str, input_root: PathBuf) -> Sample {
        let output_root = match &self.output_root {
            Some(base) => base.join(id).join(&self.output_subdir),
            None => root.join(id).join(&self.output_subdir),
        };

        Sample::new(id, input_root, output_root).with_manifest_dir(self.manifest_dir.clone())
    }

    /// Whether acquisition for the sample has finished
    ///
    /// The instrument writes a run summary next to the input directory once
    /// the run ends.
    pub fn is_run_finished(&self, sample: &Sample) -> bool {
        let Some(prefix) = &self.run_complete_prefix else {
            return false;
        };

        match std::fs::read_dir(sample.run_dir()) {
            Ok(entries) => entries.filter_map(|e| e.ok()).any(|entry| {
                entry.file_type().map(|t| t.is_file()).unwrap_or(false)
                    && entry.file_name().to_string_lossy().starts_with(prefix.as_str())
            }),
            Err(_) => false,
        }
    }
}

/// Lists the complete input units currently present in `dir`
///
/// Hidden files, files with another extension, and zero-length files still
/// being written are left out. A missing directory yields no units.
pub fn list_input_units(dir: &Path, extension: Option<&str>) -> std::io::Result<Vec<InputUnit>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut units = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }

        if let Some(ext) = extension {
            let matches = Path::new(&name)
                .extension()
                .map(|e| e == ext)
                .unwrap_or(false);
            if !matches {
                continue;
            }
        }

        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }

        let unit = InputUnit::new(name, metadata.len());
        if unit.is_complete() {
            units.push(unit);
        }
    }

    units.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(units)
}
