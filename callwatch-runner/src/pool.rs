//! Worker pool
//!
//! A fixed set of device slots draining a job queue. Slot `i` is bound to
//! device `i` for the life of the pool and runs one job at a time; a free
//! slot takes the next queued job. On success the pool records the job's
//! completion sentinel and discards its checkpoint. Failed jobs are reported
//! and left for the caller to retry.

use callwatch_core::domain::{DeviceSlot, Job, JobReport, JobResult};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::builder::write_json;
use crate::service::{CompletionReporter, ExecutionService};

/// Bounded pool of device slots
pub struct WorkerPool {
    slots: Vec<DeviceSlot>,
    queue: VecDeque<Job>,
    executor: Arc<dyn ExecutionService>,
    reporter: Arc<dyn CompletionReporter>,
}

impl WorkerPool {
    /// Creates a pool with one slot per entry of the device table
    pub fn new(
        slots: Vec<DeviceSlot>,
        executor: Arc<dyn ExecutionService>,
        reporter: Arc<dyn CompletionReporter>,
    ) -> Self {
        info!(
            "Worker pool with {} slot(s): {}",
            slots.len(),
            slots
                .iter()
                .map(|s| s.device.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Self {
            slots,
            queue: VecDeque::new(),
            executor,
            reporter,
        }
    }

    pub fn slots(&self) -> &[DeviceSlot] {
        &self.slots
    }

    /// Enqueues a job for the next run
    pub fn submit(&mut self, job: Job) {
        debug!("Queued job {}", job.label());
        self.queue.push_back(job);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Runs every queued job to a terminal result
    ///
    /// Returns once the queue is empty and every slot has finished its
    /// current job. Does not wait for further submissions.
    pub async fn run(&mut self) -> Vec<JobReport> {
        if self.queue.is_empty() {
            return Vec::new();
        }

        let total = self.queue.len();
        let queue = Arc::new(Mutex::new(std::mem::take(&mut self.queue)));
        let active = self.slots.len().min(total);
        info!("Running {} job(s) on {} slot(s)", total, active);

        let handles: Vec<_> = self
            .slots
            .iter()
            .take(active)
            .map(|slot| {
                tokio::spawn(run_slot(
                    slot.clone(),
                    Arc::clone(&queue),
                    Arc::clone(&self.executor),
                    Arc::clone(&self.reporter),
                ))
            })
            .collect();

        let mut reports = Vec::with_capacity(total);
        for handle in handles {
            match handle.await {
                Ok(slot_reports) => reports.extend(slot_reports),
                Err(e) => error!("Worker slot task panicked: {}", e),
            }
        }

        let succeeded = reports.iter().filter(|r| r.success()).count();
        info!(
            "Pool run finished: {} succeeded, {} failed",
            succeeded,
            reports.len() - succeeded
        );
        reports
    }
}

/// Executes jobs from the shared queue on one slot until it is empty
async fn run_slot(
    slot: DeviceSlot,
    queue: Arc<Mutex<VecDeque<Job>>>,
    executor: Arc<dyn ExecutionService>,
    reporter: Arc<dyn CompletionReporter>,
) -> Vec<JobReport> {
    let mut reports = Vec::new();

    loop {
        let next = queue.lock().unwrap().pop_front();
        let Some(job) = next else {
            break;
        };

        debug!("{} picked up job {}", slot, job.label());
        let started_at = Utc::now();
        let result = executor.execute(&job, &slot).await;

        let mut report = JobReport::new(&job, &slot, result, started_at);
        if report.success() {
            if let Err(e) = record_success(&job, &report) {
                error!("Job {} succeeded but its completion was not recorded: {}", job.label(), e);
                report.result = JobResult::failed(-1, format!("Failed to record completion: {}", e));
            }
        }

        reporter.job_finished(&report);
        reports.push(report);
    }

    debug!("{} idle, queue drained", slot);
    reports
}

/// Writes the job's completion sentinel and removes its checkpoint
fn record_success(job: &Job, report: &JobReport) -> std::io::Result<()> {
    write_json(&job.done_path, report)?;

    if let Some(checkpoint) = &job.checkpoint_path {
        match std::fs::remove_file(checkpoint) {
            Ok(()) => debug!("Removed checkpoint {}", checkpoint.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove checkpoint {}: {}", checkpoint.display(), e),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryReporter, ScriptedExecutor, test_job};
    use std::collections::HashSet;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_slot_always_runs_on_its_device() {
        let dir = tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new().with_delay(Duration::from_millis(15)));
        let reporter = InMemoryReporter::new();
        let mut pool = WorkerPool::new(
            DeviceSlot::table("cuda:", 2),
            executor.clone(),
            Arc::new(reporter.clone()),
        );

        for i in 0..6 {
            pool.submit(test_job(dir.path(), &format!("S{}", i), 0));
        }
        let reports = pool.run().await;

        assert_eq!(reports.len(), 6);
        for call in executor.calls() {
            assert_eq!(call.device, format!("cuda:{}", call.slot));
        }
        for report in &reports {
            assert_eq!(report.device, format!("cuda:{}", report.slot));
        }
        let used: HashSet<usize> = reports.iter().map(|r| r.slot).collect();
        assert_eq!(used, HashSet::from([0, 1]));
        assert_eq!(reporter.reports().len(), 6);
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_slots() {
        let dir = tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new().with_delay(Duration::from_millis(10)));
        let mut pool = WorkerPool::new(
            DeviceSlot::table("cuda:", 3),
            executor.clone(),
            Arc::new(InMemoryReporter::new()),
        );

        for i in 0..9 {
            pool.submit(test_job(dir.path(), &format!("S{}", i), 0));
        }
        pool.run().await;

        assert!(executor.peak_concurrency() <= 3);
        assert_eq!(executor.calls().len(), 9);
    }

    #[tokio::test]
    async fn test_success_records_sentinel_and_drops_checkpoint() {
        let dir = tempdir().unwrap();
        let mut job = test_job(dir.path(), "S1", 2);
        let checkpoint = dir.path().join("S1_job_2.checkpoint");
        std::fs::write(&checkpoint, "partial").unwrap();
        job.checkpoint_path = Some(checkpoint.clone());

        let mut pool = WorkerPool::new(
            DeviceSlot::table("cuda:", 1),
            Arc::new(ScriptedExecutor::new()),
            Arc::new(InMemoryReporter::new()),
        );
        pool.submit(job.clone());
        let reports = pool.run().await;

        assert!(reports[0].success());
        assert!(job.done_path.exists());
        assert!(!checkpoint.exists());

        let recorded: JobReport =
            serde_json::from_slice(&std::fs::read(&job.done_path).unwrap()).unwrap();
        assert_eq!(recorded.sequence, 2);
        assert_eq!(recorded.device, "cuda:0");
    }

    #[tokio::test]
    async fn test_failure_is_reported_not_retried() {
        let dir = tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new().failing("S1"));
        let reporter = InMemoryReporter::new();
        let mut pool = WorkerPool::new(
            DeviceSlot::table("cuda:", 2),
            executor.clone(),
            Arc::new(reporter.clone()),
        );

        let failing = test_job(dir.path(), "S1", 0);
        pool.submit(failing.clone());
        pool.submit(test_job(dir.path(), "S2", 0));
        let reports = pool.run().await;

        assert_eq!(reports.len(), 2);
        assert_eq!(executor.calls().len(), 2);
        let failed: Vec<&JobReport> = reports.iter().filter(|r| !r.success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].sample_id, "S1");
        assert!(!failing.done_path.exists());
        assert_eq!(reporter.reports().len(), 2);
    }

    #[tokio::test]
    async fn test_unrecorded_success_is_reported_as_failure() {
        let dir = tempdir().unwrap();
        let mut job = test_job(dir.path(), "S1", 0);
        job.done_path = dir.path().join("missing").join("job_0.done");

        let reporter = InMemoryReporter::new();
        let mut pool = WorkerPool::new(
            DeviceSlot::table("cuda:", 1),
            Arc::new(ScriptedExecutor::new()),
            Arc::new(reporter.clone()),
        );
        pool.submit(job);
        let reports = pool.run().await;

        assert!(!reports[0].success());
        assert_eq!(reports[0].result.exit_code, -1);
        assert!(
            reports[0]
                .result
                .error_message
                .as_deref()
                .unwrap()
                .contains("Failed to record completion")
        );
        assert_eq!(reporter.reports()[0].result.exit_code, -1);
    }

    #[tokio::test]
    async fn test_run_with_empty_queue_returns_immediately() {
        let mut pool = WorkerPool::new(
            DeviceSlot::table("cuda:", 2),
            Arc::new(ScriptedExecutor::new()),
            Arc::new(InMemoryReporter::new()),
        );
        assert!(pool.run().await.is_empty());
    }
}
