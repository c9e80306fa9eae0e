//! Scheduler configuration
//!
//! Defines every tunable of a scheduler run: where samples come from, where
//! outputs go, the concurrency budget, polling intervals, termination and
//! retry policies, and the external processing command.

use callwatch_core::domain::{CommandTemplate, DeviceSlot};
use callwatch_core::layout::DEFAULT_MANIFEST_DIR;
use std::path::PathBuf;
use std::time::Duration;

/// Where the scheduler gets its samples from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSource {
    /// Poll the immediate subdirectories of a root for eligible samples
    Watch(PathBuf),

    /// Read a fixed list of sample directories from a file
    List(PathBuf),
}

/// Scheduler configuration
///
/// Intervals are configurable so tests and small deployments can poll far
/// more often than a sequencing instrument produces data.
#[derive(Debug, Clone)]
pub struct Config {
    /// Source of samples
    pub source: SampleSource,

    /// Base directory for outputs; `None` keeps outputs inside each sample dir
    pub output_root: Option<PathBuf>,

    /// Maximum number of samples tracked at once
    pub sample_cap: usize,

    /// Number of device slots in the worker pool
    pub device_count: usize,

    /// Prefix of device identities, slot `i` runs on `{prefix}{i}`
    pub device_prefix: String,

    /// How long to wait between draining passes once no work is left
    pub idle_interval: Duration,

    /// How long to wait between discovery scans that found nothing
    pub discovery_interval: Duration,

    /// Terminate after this many consecutive idle rounds without new jobs
    pub max_idle_rounds: Option<u32>,

    /// Quarantine a job after this many failed attempts
    pub max_attempts: Option<u32>,

    /// Name of the directory holding raw, unclaimed input units
    pub raw_input_dir: String,

    /// Name of the directory showing another consumer owns the sample
    pub claimed_input_dir: String,

    /// Only files with this extension count as input units
    pub input_extension: Option<String>,

    /// Output directory name below the sample's output base
    pub output_subdir: String,

    /// Manifest directory name below the output directory
    pub manifest_dir: String,

    /// Prefix of the run-level file that marks the end of acquisition
    pub run_complete_prefix: Option<String>,

    /// How deep below a sample directory to look for the input directories
    pub probe_depth: usize,

    /// External processing command
    pub command: CommandTemplate,
}

impl Config {
    /// Creates a configuration with defaults for the given sample source
    pub fn new(source: SampleSource) -> Self {
        Self {
            source,
            output_root: None,
            sample_cap: 8,
            device_count: 2,
            device_prefix: "cuda:".to_string(),
            idle_interval: Duration::from_secs(600),
            discovery_interval: Duration::from_secs(120),
            max_idle_rounds: None,
            max_attempts: None,
            raw_input_dir: "pod5".to_string(),
            claimed_input_dir: "pod5_pass".to_string(),
            input_extension: Some("pod5".to_string()),
            output_subdir: "basecalls".to_string(),
            manifest_dir: DEFAULT_MANIFEST_DIR.to_string(),
            run_complete_prefix: Some("final_summary".to_string()),
            probe_depth: 3,
            command: CommandTemplate::default(),
        }
    }

    /// Creates a configuration from the caller-facing parameters
    ///
    /// # Arguments
    /// * `watched_root` - Directory whose subdirectories are samples
    /// * `output_root` - Base directory for outputs (None = inside each sample)
    /// * `sample_cap` - Maximum number of samples to process
    /// * `device_count` - Number of device slots
    /// * `idle_interval_secs` - Idle wait between draining passes
    pub fn configure(
        watched_root: PathBuf,
        output_root: Option<PathBuf>,
        sample_cap: usize,
        device_count: usize,
        idle_interval_secs: u64,
    ) -> Self {
        Self {
            output_root,
            sample_cap,
            device_count,
            idle_interval: Duration::from_secs(idle_interval_secs),
            ..Self::new(SampleSource::Watch(watched_root))
        }
    }

    /// Whether samples come from a fixed list with finished acquisition
    pub fn is_list_mode(&self) -> bool {
        matches!(self.source, SampleSource::List(_))
    }

    /// Slot-to-device table for the worker pool
    pub fn device_table(&self) -> Vec<DeviceSlot> {
        DeviceSlot::table(&self.device_prefix, self.device_count)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sample_cap == 0 {
            anyhow::bail!("sample_cap must be greater than 0");
        }

        if self.device_count == 0 {
            anyhow::bail!("device_count must be greater than 0");
        }

        if self.idle_interval.is_zero() {
            anyhow::bail!("idle_interval must be greater than 0");
        }

        if self.discovery_interval.is_zero() {
            anyhow::bail!("discovery_interval must be greater than 0");
        }

        if self.max_attempts == Some(0) {
            anyhow::bail!("max_attempts must be greater than 0");
        }

        if self.probe_depth == 0 {
            anyhow::bail!("probe_depth must be greater than 0");
        }

        for (name, value) in [
            ("raw_input_dir", &self.raw_input_dir),
            ("claimed_input_dir", &self.claimed_input_dir),
            ("output_subdir", &self.output_subdir),
            ("manifest_dir", &self.manifest_dir),
        ] {
            if value.is_empty() {
                anyhow::bail!("{} cannot be empty", name);
            }
        }

        if self.raw_input_dir == self.claimed_input_dir {
            anyhow::bail!("raw_input_dir and claimed_input_dir must differ");
        }

        if self.command.program.as_os_str().is_empty() {
            anyhow::bail!("command program cannot be empty");
        }

        Ok(())
    }
}
