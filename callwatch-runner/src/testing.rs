//! Test doubles shared by the unit tests

use async_trait::async_trait;
use callwatch_core::domain::{CommandTemplate, DeviceSlot, Job, JobReport, JobResult};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::service::{CompletionReporter, ExecutionService};

#[derive(Debug, Clone)]
pub struct ExecutedCall {
    pub slot: usize,
    pub device: String,
    pub sample_id: String,
    pub sequence: u64,
    pub checkpoint: bool,
}

/// Executor that succeeds unless the job's sample is listed as failing
#[derive(Default)]
pub struct ScriptedExecutor {
    failing: Mutex<HashSet<String>>,
    delay: Duration,
    output: Option<String>,
    running: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<ExecutedCall>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(self, sample_id: &str) -> Self {
        self.failing.lock().unwrap().insert(sample_id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Writes this text to the job output before finishing
    pub fn with_output(mut self, output: &str) -> Self {
        self.output = Some(output.to_string());
        self
    }

    pub fn heal(&self, sample_id: &str) {
        self.failing.lock().unwrap().remove(sample_id);
    }

    pub fn calls(&self) -> Vec<ExecutedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionService for ScriptedExecutor {
    async fn execute(&self, job: &Job, slot: &DeviceSlot) -> JobResult {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        self.calls.lock().unwrap().push(ExecutedCall {
            slot: slot.index,
            device: slot.device.clone(),
            sample_id: job.sample_id.clone(),
            sequence: job.sequence,
            checkpoint: job.checkpoint_path.is_some(),
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(output) = &self.output {
            let _ = std::fs::write(&job.output_path, output);
        }

        self.running.fetch_sub(1, Ordering::SeqCst);

        let fails = self.failing.lock().unwrap().contains(&job.sample_id);
        if fails {
            JobResult::failed(1, "scripted failure")
        } else {
            JobResult::succeeded()
        }
    }
}

/// Collects reports in memory
///
/// Clones share the same buffer.
#[derive(Clone, Default)]
pub struct InMemoryReporter {
    reports: Arc<Mutex<Vec<JobReport>>>,
}

impl InMemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains all collected reports
    pub fn drain(&self) -> Vec<JobReport> {
        let mut reports = self.reports.lock().unwrap();
        reports.drain(..).collect()
    }

    /// Snapshot of the collected reports without draining
    pub fn reports(&self) -> Vec<JobReport> {
        self.reports.lock().unwrap().clone()
    }
}

impl CompletionReporter for InMemoryReporter {
    fn job_finished(&self, report: &JobReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
}

/// A job whose files all live directly in `dir`
pub fn test_job(dir: &Path, sample_id: &str, sequence: u64) -> Job {
    let file = |suffix: &str| dir.join(format!("{}_job_{}.{}", sample_id, sequence, suffix));
    Job {
        sample_id: sample_id.to_string(),
        sequence,
        attempt: 1,
        input_root: dir.join(sample_id),
        manifest_path: file("manifest"),
        output_path: file("out"),
        checkpoint_path: None,
        log_path: file("log"),
        done_path: file("done"),
        command: CommandTemplate::default(),
    }
}
