//! Job builder
//!
//! Turns a sample's unclaimed input units into a job. The manifest naming
//! the units is made durable before the units are claimed, so a crash at any
//! point leaves either no trace of the job or a manifest that recovery picks
//! up again. Jobs that did not finish earlier are rebuilt from their
//! existing manifest and resume from their partial output.

use callwatch_core::domain::{CommandTemplate, Job, Sample};
use callwatch_core::layout::SampleLayout;
use callwatch_core::{Result, SchedulerError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::tracker::InputTracker;
use crate::watcher::list_input_units;

/// Contents of the per-sample completion sentinel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleCompletion {
    pub sample_id: String,
    pub jobs: u64,
    pub input_units: usize,
    pub completed_at: DateTime<Utc>,
}

/// Builds jobs from newly arrived input units
pub struct JobBuilder {
    command: CommandTemplate,
    input_extension: Option<String>,
}

impl JobBuilder {
    pub fn new(config: &Config) -> Self {
        Self {
            command: config.command.clone(),
            input_extension: config.input_extension.clone(),
        }
    }

    /// Builds at most one job per sample
    ///
    /// A failure for one sample is logged and skipped; the other samples
    /// still get their jobs.
    pub fn build_jobs_for_samples(&self, tracker: &mut InputTracker, samples: &[Sample]) -> Vec<Job> {
        let mut jobs = Vec::new();
        for sample in samples {
            match self.build_job_for_sample(tracker, sample) {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {}
                Err(e) => warn!("Skipping sample {} this round: {}", sample.id, e),
            }
        }
        jobs
    }

    /// Builds the next job for one sample, if there is work to do
    ///
    /// Retries of unfinished jobs come before new input units. A sample with
    /// a completion sentinel never gets a job.
    pub fn build_job_for_sample(
        &self,
        tracker: &mut InputTracker,
        sample: &Sample,
    ) -> Result<Option<Job>> {
        let layout = sample.layout();
        if layout.is_complete() {
            debug!("Sample {} is already complete", sample.id);
            return Ok(None);
        }

        if let Some((sequence, attempt)) = tracker.take_retry(&sample.id) {
            return self.rebuild_job(tracker, sample, sequence, attempt).map(Some);
        }

        let current = match list_input_units(&sample.input_root, self.input_extension.as_deref()) {
            Ok(units) => units,
            Err(e) => {
                warn!(
                    "Cannot list inputs of sample {} in {}: {}",
                    sample.id,
                    sample.input_root.display(),
                    e
                );
                return Ok(None);
            }
        };

        let new_units = tracker.diff(&sample.id, &current);
        if new_units.is_empty() {
            debug!("No new input units for sample {}", sample.id);
            return Ok(None);
        }

        let manifest_dir = layout.manifest_dir();
        fs::create_dir_all(&manifest_dir).map_err(|source| SchedulerError::OutputSetup {
            path: manifest_dir.clone(),
            source,
        })?;

        let sequence = tracker.next_sequence(&sample.id);
        let unit_count = new_units.len();
        write_manifest(&layout, sequence, &new_units).map_err(|source| {
            SchedulerError::ManifestWrite {
                path: layout.manifest_path(sequence),
                source,
            }
        })?;

        let attempt = tracker.commit_job(&sample.id, sequence, new_units);
        let checkpoint = match prepare_checkpoint(&layout, sequence) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                tracker.record_result(&sample.id, sequence, false);
                return Err(e);
            }
        };

        info!(
            "Built job {}#{} with {} new input unit(s)",
            sample.id, sequence, unit_count
        );

        Ok(Some(self.job(sample, sequence, attempt, checkpoint)))
    }

    /// Rebuilds an unfinished job from its existing manifest
    fn rebuild_job(
        &self,
        tracker: &mut InputTracker,
        sample: &Sample,
        sequence: u64,
        attempt: u32,
    ) -> Result<Job> {
        let layout = sample.layout();
        let checkpoint = match prepare_checkpoint(&layout, sequence) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                tracker.record_result(&sample.id, sequence, false);
                return Err(e);
            }
        };

        info!(
            "Rebuilt job {}#{} (attempt {}, {})",
            sample.id,
            sequence,
            attempt,
            if checkpoint.is_some() { "resuming from checkpoint" } else { "from scratch" }
        );

        Ok(self.job(sample, sequence, attempt, checkpoint))
    }

    fn job(&self, sample: &Sample, sequence: u64, attempt: u32, checkpoint: Option<PathBuf>) -> Job {
        let layout = sample.layout();
        Job {
            sample_id: sample.id.clone(),
            sequence,
            attempt,
            input_root: sample.input_root.clone(),
            manifest_path: layout.manifest_path(sequence),
            output_path: layout.output_path(sequence),
            checkpoint_path: checkpoint,
            log_path: layout.log_path(sequence),
            done_path: layout.done_path(sequence),
            command: self.command.clone(),
        }
    }

    /// Writes the sample's completion sentinel once all of its work is done
    ///
    /// A sample is complete when acquisition has finished, every input unit
    /// is claimed, and every job has succeeded.
    ///
    /// # Returns
    /// Whether the sample is complete
    pub fn finalize_sample(
        &self,
        tracker: &InputTracker,
        sample: &Sample,
        run_finished: bool,
    ) -> Result<bool> {
        let layout = sample.layout();
        if layout.is_complete() {
            return Ok(true);
        }

        if !run_finished || !tracker.is_settled(&sample.id) {
            return Ok(false);
        }

        let Ok(current) = list_input_units(&sample.input_root, self.input_extension.as_deref())
        else {
            return Ok(false);
        };
        if !tracker.diff(&sample.id, &current).is_empty() {
            return Ok(false);
        }

        let completion = SampleCompletion {
            sample_id: sample.id.clone(),
            jobs: tracker.next_sequence(&sample.id),
            input_units: tracker.claimed_count(&sample.id),
            completed_at: Utc::now(),
        };

        let sentinel = layout.sample_sentinel();
        write_json(&sentinel, &completion).map_err(|source| SchedulerError::Sentinel {
            path: sentinel.clone(),
            source,
        })?;

        info!(
            "Sample {} complete: {} job(s), {} input unit(s)",
            sample.id, completion.jobs, completion.input_units
        );
        Ok(true)
    }
}

/// Writes a manifest atomically: staged, synced, then renamed into place
fn write_manifest(
    layout: &SampleLayout<'_>,
    sequence: u64,
    units: &BTreeSet<String>,
) -> std::io::Result<PathBuf> {
    let staging = layout.manifest_staging_path(sequence);
    let path = layout.manifest_path(sequence);

    let staged = (|| {
        let mut file = File::create(&staging)?;
        for unit in units {
            writeln!(file, "{}", unit)?;
        }
        file.sync_all()?;
        fs::rename(&staging, &path)?;
        sync_dir(&layout.manifest_dir())
    })();

    if staged.is_err() {
        let _ = fs::remove_file(&staging);
    }
    staged.map(|_| path)
}

/// Turns a partial output into the job's checkpoint
///
/// A non-empty output left by an interrupted attempt replaces any older
/// checkpoint.
///
/// # Returns
/// The checkpoint path when a non-empty checkpoint exists
fn prepare_checkpoint(layout: &SampleLayout<'_>, sequence: u64) -> Result<Option<PathBuf>> {
    let output = layout.output_path(sequence);
    let checkpoint = layout.checkpoint_path(sequence);

    if file_len(&output) > 0 {
        info!(
            "Moving partial output {} to checkpoint {}",
            output.display(),
            checkpoint.display()
        );
        fs::rename(&output, &checkpoint).map_err(|source| SchedulerError::Checkpoint {
            path: checkpoint.clone(),
            source,
        })?;
    }

    if file_len(&checkpoint) > 0 {
        Ok(Some(checkpoint))
    } else {
        Ok(None)
    }
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .unwrap_or(0)
}

/// Writes a JSON document and syncs it to disk
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
    let mut file = File::create(path)?;
    file.write_all(&json)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
