//! Callwatch
//!
//! Watches a directory of sequencing samples (or reads a fixed list of them)
//! and runs the basecaller over newly produced input units on a fixed set of
//! GPUs until the run is stopped, idles out, or every sample is complete.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use callwatch_runner::shutdown::install_shutdown_handler;
use callwatch_runner::{
    CompletionReporter, Config, ExecutionService, ProcessExecutionService, SampleSource,
    Scheduler, TracingReporter,
};

#[derive(Parser)]
#[command(name = "callwatch")]
#[command(about = "Incremental basecalling scheduler for live sequencing runs", long_about = None)]
struct Cli {
    /// Directory whose subdirectories are samples
    #[arg(
        long,
        env = "CALLWATCH_WATCH_ROOT",
        conflicts_with = "sample_list",
        required_unless_present = "sample_list"
    )]
    watch_root: Option<PathBuf>,

    /// File listing sample directories, one per line
    #[arg(long, env = "CALLWATCH_SAMPLE_LIST")]
    sample_list: Option<PathBuf>,

    /// Base directory for outputs (default: inside each sample directory)
    #[arg(long, env = "CALLWATCH_OUTPUT_ROOT")]
    output_root: Option<PathBuf>,

    /// Maximum number of samples to process
    #[arg(long, env = "CALLWATCH_SAMPLE_CAP", default_value_t = 8)]
    sample_cap: usize,

    /// Number of GPUs to run jobs on
    #[arg(long, env = "CALLWATCH_DEVICES", default_value_t = 2)]
    devices: usize,

    /// Device identity prefix, slot i runs on {prefix}{i}
    #[arg(long, env = "CALLWATCH_DEVICE_PREFIX", default_value = "cuda:")]
    device_prefix: String,

    /// Seconds to wait once no work is left before looking again
    #[arg(long, env = "CALLWATCH_IDLE_INTERVAL_SECS", default_value_t = 600)]
    idle_interval_secs: u64,

    /// Seconds between discovery scans while no sample is eligible
    #[arg(long, env = "CALLWATCH_DISCOVERY_INTERVAL_SECS", default_value_t = 120)]
    discovery_interval_secs: u64,

    /// Stop after this many consecutive idle waits without new jobs
    #[arg(long, env = "CALLWATCH_MAX_IDLE_ROUNDS")]
    max_idle_rounds: Option<u32>,

    /// Stop retrying a job after this many failed attempts
    #[arg(long, env = "CALLWATCH_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Name of the raw input directory
    #[arg(long, env = "CALLWATCH_RAW_INPUT_DIR", default_value = "pod5")]
    raw_input_dir: String,

    /// Name of the directory marking a sample as claimed by another consumer
    #[arg(long, env = "CALLWATCH_CLAIMED_INPUT_DIR", default_value = "pod5_pass")]
    claimed_input_dir: String,

    /// Extension of input units (empty accepts every file)
    #[arg(long, env = "CALLWATCH_INPUT_EXTENSION", default_value = "pod5")]
    input_extension: String,

    /// Output directory name inside each sample
    #[arg(long, env = "CALLWATCH_OUTPUT_SUBDIR", default_value = "basecalls")]
    output_subdir: String,

    /// Manifest directory name inside the output directory
    #[arg(long, env = "CALLWATCH_MANIFEST_DIR", default_value = "manifests")]
    manifest_dir: String,

    /// File name prefix showing acquisition has finished (empty disables)
    #[arg(long, env = "CALLWATCH_RUN_COMPLETE_PREFIX", default_value = "final_summary")]
    run_complete_prefix: String,

    /// How deep below a sample to look for the input directories
    #[arg(long, env = "CALLWATCH_PROBE_DEPTH", default_value_t = 3)]
    probe_depth: usize,

    /// Basecaller executable
    #[arg(long, env = "CALLWATCH_PROGRAM", default_value = "dorado")]
    program: PathBuf,

    /// Basecalling model
    #[arg(long, env = "CALLWATCH_MODEL", default_value = "sup,5mCG_5hmCG")]
    model: String,

    /// Extra argument appended to the basecaller command (repeatable)
    #[arg(long = "extra-arg", allow_hyphen_values = true)]
    extra_args: Vec<String>,
}

impl Cli {
    fn into_config(self) -> Result<Config> {
        let source = match (self.watch_root, self.sample_list) {
            (_, Some(list)) => SampleSource::List(list),
            (Some(root), None) => SampleSource::Watch(root),
            (None, None) => anyhow::bail!("either --watch-root or --sample-list is required"),
        };

        let mut config = Config::new(source);
        config.output_root = self.output_root;
        config.sample_cap = self.sample_cap;
        config.device_count = self.devices;
        config.device_prefix = self.device_prefix;
        config.idle_interval = Duration::from_secs(self.idle_interval_secs);
        config.discovery_interval = Duration::from_secs(self.discovery_interval_secs);
        config.max_idle_rounds = self.max_idle_rounds;
        config.max_attempts = self.max_attempts;
        config.raw_input_dir = self.raw_input_dir;
        config.claimed_input_dir = self.claimed_input_dir;
        config.input_extension = non_empty(self.input_extension);
        config.output_subdir = self.output_subdir;
        config.manifest_dir = self.manifest_dir;
        config.run_complete_prefix = non_empty(self.run_complete_prefix);
        config.probe_depth = self.probe_depth;
        config.command.program = self.program;
        config.command.model = self.model;
        config.command = config.command.with_extra_args(self.extra_args);
        Ok(config)
    }
}

/// Log filter used when RUST_LOG is unset, covering the binary and both libraries
const DEFAULT_LOG_FILTER: &str = "callwatch=info,callwatch_runner=info,callwatch_core=info";

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Callwatch");

    let config = Cli::parse().into_config()?;
    match &config.source {
        SampleSource::Watch(root) => info!("Watching {}", root.display()),
        SampleSource::List(list) => info!("Processing samples listed in {}", list.display()),
    }
    info!(
        "Sample cap: {}, devices: {}, idle interval: {:?}",
        config.sample_cap, config.device_count, config.idle_interval
    );

    let executor: Arc<dyn ExecutionService> = Arc::new(ProcessExecutionService::new());
    let reporter: Arc<dyn CompletionReporter> = Arc::new(TracingReporter);

    let scheduler = Scheduler::configure(config, executor, reporter)?;
    install_shutdown_handler(scheduler.stop_handle());

    let summary = match scheduler.start().await {
        Ok(summary) => summary,
        Err(e) => {
            error!("Scheduler error: {}", e);
            return Err(e).context("Scheduler aborted");
        }
    };

    info!(
        "Finished: {} ({} job(s) succeeded, {} failed)",
        summary.reason, summary.jobs_succeeded, summary.jobs_failed
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_filter_covers_binary() {
        let own = format!("{}=info", env!("CARGO_CRATE_NAME"));
        assert!(DEFAULT_LOG_FILTER.split(',').any(|d| d == own));
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn test_sample_list_selects_list_mode() {
        let cli = Cli::parse_from(["callwatch", "--sample-list", "/data/samples.txt"]);
        let config = cli.into_config().unwrap();
        assert!(config.is_list_mode());
    }

    #[test]
    fn test_empty_extension_accepts_every_file() {
        let cli = Cli::parse_from(["callwatch", "--watch-root", "/data", "--input-extension", ""]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.input_extension, None);
        assert_eq!(config.run_complete_prefix.as_deref(), Some("final_summary"));
    }
}
