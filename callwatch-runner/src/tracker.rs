//! Input tracker
//!
//! Per-sample bookkeeping of which input units have been claimed into a job,
//! which sequence number the next job gets, and which jobs still have to
//! (re)run. The claimed set only ever grows. It is rebuilt at startup from
//! the manifests on disk and afterwards mutated only by the coordinating
//! scheduler task.

use callwatch_core::domain::{InputUnit, Sample};
use callwatch_core::layout::parse_manifest_sequence;
use callwatch_core::{Result, SchedulerError};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Bookkeeping for one sample
#[derive(Debug, Default)]
struct SampleState {
    claimed: HashSet<String>,
    next_sequence: u64,
    /// Built and handed to the pool, no result yet
    in_flight: BTreeSet<u64>,
    /// May be rebuilt on the next draining pass
    retryable: BTreeSet<u64>,
    /// Failed this round, released on the next idle wake-up
    deferred: BTreeSet<u64>,
    /// Failed too often, never retried again
    quarantined: BTreeSet<u64>,
    attempts: HashMap<u64, u32>,
}

/// What a manifest recovery found for one sample
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    pub manifests: usize,
    pub claimed_units: usize,
    pub next_sequence: u64,
    /// Jobs with a manifest but no completion record
    pub incomplete_jobs: Vec<u64>,
    /// Claimed units that are no longer on disk
    pub missing_units: usize,
}

/// Tracks claimed input units and job progress for every sample
#[derive(Debug, Default)]
pub struct InputTracker {
    samples: HashMap<String, SampleState>,
    max_attempts: Option<u32>,
}

impl InputTracker {
    /// Creates a tracker
    ///
    /// # Arguments
    /// * `max_attempts` - Quarantine a job after this many failures (None = never)
    pub fn new(max_attempts: Option<u32>) -> Self {
        Self {
            samples: HashMap::new(),
            max_attempts,
        }
    }

    fn state_mut(&mut self, sample_id: &str) -> &mut SampleState {
        self.samples.entry(sample_id.to_string()).or_default()
    }

    /// Rebuilds a sample's claimed set from the manifests of earlier runs
    ///
    /// Every listed unit is claimed, the next sequence number becomes one past
    /// the highest manifest found, and manifests without a completion record
    /// are queued for retry. Units that vanished from disk stay claimed.
    /// Calling this again for the same sample changes nothing.
    pub fn recover_from_manifests(&mut self, sample: &Sample) -> Result<RecoverySummary> {
        let layout = sample.layout();
        let manifest_dir = layout.manifest_dir();
        let recovery_error = |source| SchedulerError::Recovery {
            path: manifest_dir.clone(),
            source,
        };

        let mut manifests = Vec::new();
        match std::fs::read_dir(&manifest_dir) {
            Ok(entries) => {
                for entry in entries {
                    let entry = entry.map_err(recovery_error)?;
                    let name = entry.file_name().to_string_lossy().into_owned();
                    let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
                    if let Some(sequence) = parse_manifest_sequence(&name).filter(|_| is_file) {
                        manifests.push((sequence, entry.path()));
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No manifests for sample {} yet", sample.id);
            }
            Err(e) => return Err(recovery_error(e)),
        }
        manifests.sort();

        let mut summary = RecoverySummary::default();
        let state = self.state_mut(&sample.id);

        for (sequence, path) in &manifests {
            let content = std::fs::read_to_string(path).map_err(|source| SchedulerError::Recovery {
                path: path.clone(),
                source,
            })?;

            for unit in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
                if !sample.input_root.join(unit).exists() {
                    summary.missing_units += 1;
                }
                state.claimed.insert(unit.to_string());
            }

            state.next_sequence = state.next_sequence.max(sequence + 1);

            let finished = layout.done_path(*sequence).exists();
            let known = state.in_flight.contains(sequence)
                || state.deferred.contains(sequence)
                || state.quarantined.contains(sequence);
            if !finished && !known {
                state.retryable.insert(*sequence);
                summary.incomplete_jobs.push(*sequence);
            }
        }

        summary.manifests = manifests.len();
        summary.claimed_units = state.claimed.len();
        summary.next_sequence = state.next_sequence;

        if summary.missing_units > 0 {
            warn!(
                "Sample {}: {} claimed unit(s) no longer exist in {}, keeping them claimed",
                sample.id,
                summary.missing_units,
                sample.input_root.display()
            );
        }

        info!(
            "Recovered sample {}: {} manifest(s), {} claimed unit(s), next sequence {}, {} incomplete job(s)",
            sample.id,
            summary.manifests,
            summary.claimed_units,
            summary.next_sequence,
            summary.incomplete_jobs.len()
        );

        Ok(summary)
    }

    /// Returns the units of `current` that no job has claimed yet
    pub fn diff(&self, sample_id: &str, current: &[InputUnit]) -> BTreeSet<String> {
        let claimed = self.samples.get(sample_id).map(|s| &s.claimed);
        current
            .iter()
            .filter(|unit| !claimed.is_some_and(|c| c.contains(&unit.name)))
            .map(|unit| unit.name.clone())
            .collect()
    }

    /// Adds units to a sample's claimed set
    ///
    /// Only call once the manifest listing these units is durable.
    pub fn claim<I>(&mut self, sample_id: &str, units: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.state_mut(sample_id).claimed.extend(units);
    }

    /// Sequence number the next new job for this sample will get
    pub fn next_sequence(&self, sample_id: &str) -> u64 {
        self.samples.get(sample_id).map(|s| s.next_sequence).unwrap_or(0)
    }

    /// Records a new job whose manifest has just been written
    ///
    /// Claims the units, advances the sequence counter and marks the job in
    /// flight.
    ///
    /// # Returns
    /// The attempt number of the job
    pub fn commit_job<I>(&mut self, sample_id: &str, sequence: u64, units: I) -> u32
    where
        I: IntoIterator<Item = String>,
    {
        self.claim(sample_id, units);
        let state = self.state_mut(sample_id);
        state.next_sequence = state.next_sequence.max(sequence + 1);
        state.in_flight.insert(sequence);
        let attempt = state.attempts.entry(sequence).or_insert(0);
        *attempt += 1;
        *attempt
    }

    /// Takes the oldest job of this sample that is due for a retry
    ///
    /// # Returns
    /// The job's sequence number and its new attempt number
    pub fn take_retry(&mut self, sample_id: &str) -> Option<(u64, u32)> {
        let state = self.samples.get_mut(sample_id)?;
        let sequence = state.retryable.pop_first()?;
        state.in_flight.insert(sequence);
        let attempt = state.attempts.entry(sequence).or_insert(0);
        *attempt += 1;
        Some((sequence, *attempt))
    }

    /// Records the terminal result of a job
    ///
    /// Failed jobs are deferred until the next idle wake-up, or quarantined
    /// once they reach the attempt limit.
    pub fn record_result(&mut self, sample_id: &str, sequence: u64, success: bool) {
        let max_attempts = self.max_attempts;
        let state = self.state_mut(sample_id);
        state.in_flight.remove(&sequence);

        if success {
            state.attempts.remove(&sequence);
            return;
        }

        let attempts = state.attempts.get(&sequence).copied().unwrap_or(1);
        if max_attempts.is_some_and(|max| attempts >= max) {
            warn!(
                "Quarantining job {}#{} after {} failed attempt(s)",
                sample_id, sequence, attempts
            );
            state.quarantined.insert(sequence);
        } else {
            debug!("Deferring retry of job {}#{}", sample_id, sequence);
            state.deferred.insert(sequence);
        }
    }

    /// Treats every job still in flight as failed
    ///
    /// Used when a pool run ends without a result for some job.
    pub fn abandon_in_flight(&mut self) {
        let lost: Vec<(String, u64)> = self
            .samples
            .iter()
            .flat_map(|(id, s)| s.in_flight.iter().map(move |seq| (id.clone(), *seq)))
            .collect();

        for (sample_id, sequence) in lost {
            warn!("No result for job {}#{}, treating it as failed", sample_id, sequence);
            self.record_result(&sample_id, sequence, false);
        }
    }

    /// Makes deferred jobs retryable again
    ///
    /// # Returns
    /// The number of released jobs
    pub fn release_deferred(&mut self) -> usize {
        let mut released = 0;
        for state in self.samples.values_mut() {
            released += state.deferred.len();
            let deferred = std::mem::take(&mut state.deferred);
            state.retryable.extend(deferred);
        }
        released
    }

    /// Whether the sample has no job waiting, running, failed or quarantined
    pub fn is_settled(&self, sample_id: &str) -> bool {
        self.samples.get(sample_id).is_none_or(|s| {
            s.in_flight.is_empty()
                && s.retryable.is_empty()
                && s.deferred.is_empty()
                && s.quarantined.is_empty()
        })
    }

    pub fn is_claimed(&self, sample_id: &str, unit: &str) -> bool {
        self.samples
            .get(sample_id)
            .is_some_and(|s| s.claimed.contains(unit))
    }

    pub fn claimed_count(&self, sample_id: &str) -> usize {
        self.samples.get(sample_id).map(|s| s.claimed.len()).unwrap_or(0)
    }

    pub fn quarantined(&self, sample_id: &str) -> Vec<u64> {
        self.samples
            .get(sample_id)
            .map(|s| s.quarantined.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn sample(root: &Path) -> Sample {
        let input = root.join("S1/run/pod5");
        fs::create_dir_all(&input).unwrap();
        Sample::new("S1", input, root.join("S1/basecalls"))
    }

    fn units(names: &[&str]) -> Vec<InputUnit> {
        names.iter().map(|n| InputUnit::new(*n, 10)).collect()
    }

    fn write_manifest(sample: &Sample, sequence: u64, names: &[&str]) {
        let layout = sample.layout();
        fs::create_dir_all(layout.manifest_dir()).unwrap();
        fs::write(layout.manifest_path(sequence), names.join("\n") + "\n").unwrap();
        for name in names {
            fs::write(sample.input_root.join(name), "data").unwrap();
        }
    }

    #[test]
    fn test_diff_does_not_mutate() {
        let mut tracker = InputTracker::new(None);
        tracker.claim("S1", vec!["a.pod5".to_string()]);

        let current = units(&["a.pod5", "b.pod5"]);
        let first = tracker.diff("S1", &current);
        let second = tracker.diff("S1", &current);

        assert_eq!(first, BTreeSet::from(["b.pod5".to_string()]));
        assert_eq!(first, second);
        assert_eq!(tracker.claimed_count("S1"), 1);
    }

    #[test]
    fn test_diff_unknown_sample_returns_everything() {
        let tracker = InputTracker::new(None);
        assert_eq!(tracker.diff("nobody", &units(&["a", "b"])).len(), 2);
    }

    #[test]
    fn test_recover_from_manifests() {
        let dir = tempdir().unwrap();
        let sample = sample(dir.path());
        write_manifest(&sample, 0, &["a.pod5", "b.pod5"]);
        write_manifest(&sample, 1, &["c.pod5"]);
        fs::write(sample.layout().done_path(0), "{}").unwrap();

        let mut tracker = InputTracker::new(None);
        let summary = tracker.recover_from_manifests(&sample).unwrap();

        assert_eq!(summary.manifests, 2);
        assert_eq!(summary.claimed_units, 3);
        assert_eq!(summary.next_sequence, 2);
        assert_eq!(summary.incomplete_jobs, vec![1]);
        assert_eq!(summary.missing_units, 0);
        assert_eq!(tracker.next_sequence("S1"), 2);
        assert!(tracker.is_claimed("S1", "c.pod5"));
    }

    #[test]
    fn test_recover_is_idempotent() {
        let dir = tempdir().unwrap();
        let sample = sample(dir.path());
        write_manifest(&sample, 0, &["a.pod5"]);

        let mut tracker = InputTracker::new(None);
        let first = tracker.recover_from_manifests(&sample).unwrap();
        assert_eq!(tracker.take_retry("S1"), Some((0, 1)));

        let second = tracker.recover_from_manifests(&sample).unwrap();
        assert_eq!(second.claimed_units, first.claimed_units);
        assert_eq!(second.next_sequence, first.next_sequence);
        // The in-flight retry is not queued a second time
        assert_eq!(tracker.take_retry("S1"), None);
    }

    #[test]
    fn test_recover_ignores_staging_files_and_missing_dir() {
        let dir = tempdir().unwrap();
        let sample = sample(dir.path());

        let mut tracker = InputTracker::new(None);
        let summary = tracker.recover_from_manifests(&sample).unwrap();
        assert_eq!(summary, RecoverySummary::default());

        let layout = sample.layout();
        fs::create_dir_all(layout.manifest_dir()).unwrap();
        fs::write(layout.manifest_staging_path(0), "half.pod5\n").unwrap();

        let summary = tracker.recover_from_manifests(&sample).unwrap();
        assert_eq!(summary.manifests, 0);
        assert_eq!(tracker.next_sequence("S1"), 0);
    }

    #[test]
    fn test_recover_keeps_vanished_units_claimed() {
        let dir = tempdir().unwrap();
        let sample = sample(dir.path());
        write_manifest(&sample, 0, &["a.pod5", "gone.pod5"]);
        fs::remove_file(sample.input_root.join("gone.pod5")).unwrap();

        let mut tracker = InputTracker::new(None);
        let summary = tracker.recover_from_manifests(&sample).unwrap();

        assert_eq!(summary.missing_units, 1);
        assert!(tracker.is_claimed("S1", "gone.pod5"));
    }

    #[test]
    fn test_no_double_claim_after_restart() {
        let dir = tempdir().unwrap();
        let sample = sample(dir.path());

        // Crash after the manifests were written but before anything was claimed
        write_manifest(&sample, 0, &["a.pod5", "b.pod5"]);
        write_manifest(&sample, 1, &["c.pod5"]);

        let mut tracker = InputTracker::new(None);
        tracker.recover_from_manifests(&sample).unwrap();

        let new_units = tracker.diff("S1", &units(&["a.pod5", "b.pod5", "c.pod5", "d.pod5"]));
        assert_eq!(new_units, BTreeSet::from(["d.pod5".to_string()]));
    }

    #[test]
    fn test_commit_job_advances_sequence() {
        let mut tracker = InputTracker::new(None);
        assert_eq!(tracker.next_sequence("S1"), 0);

        let attempt = tracker.commit_job("S1", 0, vec!["a".to_string()]);
        assert_eq!(attempt, 1);
        assert_eq!(tracker.next_sequence("S1"), 1);
        assert!(!tracker.is_settled("S1"));

        tracker.record_result("S1", 0, true);
        assert!(tracker.is_settled("S1"));
    }

    #[test]
    fn test_failed_job_is_deferred_until_released() {
        let mut tracker = InputTracker::new(None);
        tracker.commit_job("S1", 0, vec!["a".to_string()]);
        tracker.record_result("S1", 0, false);

        assert_eq!(tracker.take_retry("S1"), None);
        assert_eq!(tracker.release_deferred(), 1);
        assert_eq!(tracker.take_retry("S1"), Some((0, 2)));
    }

    #[test]
    fn test_quarantine_after_max_attempts() {
        let mut tracker = InputTracker::new(Some(2));
        tracker.commit_job("S1", 0, vec!["a".to_string()]);
        tracker.record_result("S1", 0, false);
        tracker.release_deferred();

        assert_eq!(tracker.take_retry("S1"), Some((0, 2)));
        tracker.record_result("S1", 0, false);

        assert_eq!(tracker.release_deferred(), 0);
        assert_eq!(tracker.take_retry("S1"), None);
        assert_eq!(tracker.quarantined("S1"), vec![0]);
        assert!(!tracker.is_settled("S1"));
    }

    #[test]
    fn test_abandon_in_flight() {
        let mut tracker = InputTracker::new(None);
        tracker.commit_job("S1", 0, vec!["a".to_string()]);
        tracker.commit_job("S2", 0, vec!["b".to_string()]);

        tracker.abandon_in_flight();
        assert_eq!(tracker.release_deferred(), 2);
    }
}
