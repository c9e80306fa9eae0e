//! Scheduler control loop
//!
//! Drives the scheduler through its states:
//!
//! ```text
//! Discovering -> Priming -> Draining -> IdleWait -> (Draining | Terminated)
//! ```
//!
//! Job building for one round never starts before the previous round's pool
//! run has returned, so the tracker is only ever touched from this task.
//! Stop requests are honoured between rounds; jobs already running are
//! allowed to finish.

use anyhow::Context as AnyhowContext;
use callwatch_core::domain::Sample;
use callwatch_core::{Result, SchedulerError};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::builder::JobBuilder;
use crate::config::{Config, SampleSource};
use crate::pool::WorkerPool;
use crate::service::{CompletionReporter, ExecutionService};
use crate::tracker::InputTracker;
use crate::watcher::DirectoryWatcher;

/// States of the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Discovering,
    Priming,
    Draining,
    IdleWait,
    Terminated(TerminationReason),
}

/// Why the scheduler stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TerminationReason {
    /// A stop was requested
    Stopped,
    /// Too many consecutive idle rounds without new jobs
    IdleLimit,
    /// Every sample carries its completion sentinel
    AllComplete,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::Stopped => write!(f, "stop requested"),
            TerminationReason::IdleLimit => write!(f, "idle limit reached"),
            TerminationReason::AllComplete => write!(f, "all samples complete"),
        }
    }
}

/// Outcome of a scheduler run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub rounds: usize,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub samples: usize,
    pub samples_complete: usize,
    pub reason: TerminationReason,
}

/// Requests a graceful shutdown at the next round boundary
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        info!("Stop requested, finishing the current round");
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// The incremental batch-job scheduler
pub struct Scheduler {
    config: Config,
    watcher: DirectoryWatcher,
    builder: JobBuilder,
    tracker: InputTracker,
    pool: WorkerPool,
    samples: Vec<Sample>,
    token: CancellationToken,
    run_id: Uuid,
    rounds: usize,
    jobs_succeeded: usize,
    jobs_failed: usize,
    samples_complete: usize,
}

impl Scheduler {
    /// Creates a scheduler from a validated configuration
    ///
    /// # Arguments
    /// * `config` - Scheduler configuration
    /// * `executor` - Runs the processing command for a job
    /// * `reporter` - Notified once per finished job
    pub fn configure(
        config: Config,
        executor: Arc<dyn ExecutionService>,
        reporter: Arc<dyn CompletionReporter>,
    ) -> anyhow::Result<Self> {
        config.validate().context("Invalid scheduler configuration")?;

        let pool = WorkerPool::new(config.device_table(), executor, reporter);
        Ok(Self {
            watcher: DirectoryWatcher::new(&config),
            builder: JobBuilder::new(&config),
            tracker: InputTracker::new(config.max_attempts),
            pool,
            samples: Vec::new(),
            token: CancellationToken::new(),
            run_id: Uuid::new_v4(),
            rounds: 0,
            jobs_succeeded: 0,
            jobs_failed: 0,
            samples_complete: 0,
            config,
        })
    }

    /// Handle for stopping the scheduler from another task
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.token.clone(),
        }
    }

    /// Runs the scheduler until it terminates
    ///
    /// Discovery and priming errors abort the run. Failures of individual
    /// samples or jobs never do.
    pub async fn start(mut self) -> Result<RunSummary> {
        info!("Starting scheduler run {}", self.run_id);

        let mut state = SchedulerState::Discovering;
        let mut discovered = Vec::new();
        let mut idle_rounds: u32 = 0;

        let reason = loop {
            debug!("Scheduler state: {:?}", state);
            state = match state {
                SchedulerState::Discovering => match self.discover().await? {
                    Some(samples) => {
                        discovered = samples;
                        SchedulerState::Priming
                    }
                    None => SchedulerState::Terminated(TerminationReason::Stopped),
                },
                SchedulerState::Priming => {
                    for sample in std::mem::take(&mut discovered) {
                        self.prime(sample)?;
                    }
                    SchedulerState::Draining
                }
                SchedulerState::Draining => {
                    let built = self.drain().await;
                    if built > 0 {
                        idle_rounds = 0;
                    } else {
                        idle_rounds += 1;
                    }

                    if self.token.is_cancelled() {
                        SchedulerState::Terminated(TerminationReason::Stopped)
                    } else if self.finalize_samples() {
                        SchedulerState::Terminated(TerminationReason::AllComplete)
                    } else if self
                        .config
                        .max_idle_rounds
                        .is_some_and(|max| idle_rounds > max)
                    {
                        SchedulerState::Terminated(TerminationReason::IdleLimit)
                    } else {
                        SchedulerState::IdleWait
                    }
                }
                SchedulerState::IdleWait => {
                    if self.idle_wait().await {
                        let released = self.tracker.release_deferred();
                        if released > 0 {
                            info!("Released {} failed job(s) for retry", released);
                        }
                        self.adopt_new_samples()?;
                        SchedulerState::Draining
                    } else {
                        SchedulerState::Terminated(TerminationReason::Stopped)
                    }
                }
                SchedulerState::Terminated(reason) => break reason,
            };
        };

        let summary = RunSummary {
            run_id: self.run_id,
            rounds: self.rounds,
            jobs_succeeded: self.jobs_succeeded,
            jobs_failed: self.jobs_failed,
            samples: self.samples.len(),
            samples_complete: self.samples_complete,
            reason,
        };

        info!(
            "Scheduler run {} terminated ({}): {} round(s), {} job(s) succeeded, {} failed, {}/{} sample(s) complete",
            summary.run_id,
            summary.reason,
            summary.rounds,
            summary.jobs_succeeded,
            summary.jobs_failed,
            summary.samples_complete,
            summary.samples
        );

        Ok(summary)
    }

    /// Finds the initial set of samples
    async fn discover(&mut self) -> Result<Option<Vec<Sample>>> {
        match &self.config.source {
            SampleSource::Watch(root) => {
                self.watcher
                    .discover(root, self.config.sample_cap, &self.token)
                    .await
            }
            SampleSource::List(path) => self
                .watcher
                .load_sample_list(path, self.config.sample_cap)
                .map(Some),
        }
    }

    /// Prepares a sample's output directory and recovers its earlier state
    fn prime(&mut self, sample: Sample) -> Result<()> {
        let manifest_dir = sample.layout().manifest_dir();
        std::fs::create_dir_all(&manifest_dir).map_err(|source| SchedulerError::OutputSetup {
            path: manifest_dir.clone(),
            source,
        })?;

        self.tracker.recover_from_manifests(&sample)?;

        info!(
            "Tracking sample {} (input: {}, output: {})",
            sample.id,
            sample.input_root.display(),
            sample.output_root.display()
        );
        self.samples.push(sample);
        Ok(())
    }

    /// Builds and runs rounds of jobs until a round produces none
    ///
    /// # Returns
    /// The number of jobs built
    async fn drain(&mut self) -> usize {
        let mut built = 0;

        while !self.token.is_cancelled() {
            let jobs = self
                .builder
                .build_jobs_for_samples(&mut self.tracker, &self.samples);
            if jobs.is_empty() {
                break;
            }

            self.rounds += 1;
            built += jobs.len();
            info!("Round {}: dispatching {} job(s)", self.rounds, jobs.len());

            for job in jobs {
                self.pool.submit(job);
            }

            for report in self.pool.run().await {
                if report.success() {
                    self.jobs_succeeded += 1;
                } else {
                    self.jobs_failed += 1;
                }
                self.tracker
                    .record_result(&report.sample_id, report.sequence, report.success());
            }
            self.tracker.abandon_in_flight();
        }

        built
    }

    /// Writes completion sentinels for samples with nothing left to do
    ///
    /// # Returns
    /// Whether the run has no work left at all
    fn finalize_samples(&mut self) -> bool {
        let list_mode = self.config.is_list_mode();
        let mut complete = 0;

        for sample in &self.samples {
            let run_finished = list_mode || self.watcher.is_run_finished(sample);
            match self.builder.finalize_sample(&self.tracker, sample, run_finished) {
                Ok(true) => complete += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to finalize sample {}: {}", sample.id, e),
            }
        }

        self.samples_complete = complete;
        let no_more_samples = list_mode || self.samples.len() >= self.config.sample_cap;
        complete == self.samples.len() && no_more_samples
    }

    /// Sleeps for the idle interval
    ///
    /// # Returns
    /// `false` if a stop was requested while waiting
    async fn idle_wait(&self) -> bool {
        info!("No pending work, checking again in {:?}", self.config.idle_interval);
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(self.config.idle_interval) => true,
        }
    }

    /// Starts tracking samples that became eligible after discovery
    fn adopt_new_samples(&mut self) -> Result<()> {
        let SampleSource::Watch(root) = &self.config.source else {
            return Ok(());
        };
        if self.samples.len() >= self.config.sample_cap {
            return Ok(());
        }

        let root: PathBuf = root.clone();
        let eligible = match self.watcher.scan(&root) {
            Ok(eligible) => eligible,
            Err(e) => {
                warn!("Rescan of {} failed: {}", root.display(), e);
                return Ok(());
            }
        };

        for (id, input_root) in eligible {
            if self.samples.len() >= self.config.sample_cap {
                break;
            }
            if self.samples.iter().any(|s| s.id == id) {
                continue;
            }

            info!("Adopting newly eligible sample {}", id);
            let sample = self.watcher.sample(&root, &id, input_root);
            self.prime(sample)?;
        }

        Ok(())
    }
}
