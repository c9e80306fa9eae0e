//! Completion reporting
//!
//! Every finished job is reported exactly once, with its sample, sequence
//! number and outcome, as soon as its worker slot is done with it.

use callwatch_core::domain::JobReport;
use tracing::{info, warn};

/// Receives one report per finished job
///
/// Called from worker slots, possibly concurrently.
pub trait CompletionReporter: Send + Sync {
    fn job_finished(&self, report: &JobReport);
}

impl<F> CompletionReporter for F
where
    F: Fn(&JobReport) + Send + Sync,
{
    fn job_finished(&self, report: &JobReport) {
        self(report)
    }
}

/// Logs every finished job
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl CompletionReporter for TracingReporter {
    fn job_finished(&self, report: &JobReport) {
        let elapsed = report.completed_at - report.started_at;
        if report.success() {
            info!(
                "Job {}#{} succeeded on {} after {}s",
                report.sample_id,
                report.sequence,
                report.device,
                elapsed.num_seconds()
            );
        } else {
            warn!(
                "Job {}#{} failed on {} after {}s (exit code {}): {}",
                report.sample_id,
                report.sequence,
                report.device,
                elapsed.num_seconds(),
                report.result.exit_code,
                report.result.error_message.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryReporter;
    use callwatch_core::domain::JobResult;
    use chrono::Utc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn report(sequence: u64, success: bool) -> JobReport {
        JobReport {
            sample_id: "S1".to_string(),
            sequence,
            attempt: 1,
            slot: 0,
            device: "cuda:0".to_string(),
            result: if success {
                JobResult::succeeded()
            } else {
                JobResult::failed(2, "boom")
            },
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_in_memory_reporter_drain() {
        let reporter = InMemoryReporter::new();
        let shared = reporter.clone();

        reporter.job_finished(&report(0, true));
        shared.job_finished(&report(1, false));

        assert_eq!(reporter.reports().len(), 2);
        let drained = reporter.drain();
        assert_eq!(drained.len(), 2);
        assert!(drained[0].success());
        assert!(!drained[1].success());
        assert!(shared.reports().is_empty());
    }

    #[test]
    fn test_closure_reporter() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let reporter = move |_: &JobReport| {
            counter.fetch_add(1, Ordering::SeqCst);
        };

        reporter.job_finished(&report(0, true));
        TracingReporter.job_finished(&report(1, false));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
