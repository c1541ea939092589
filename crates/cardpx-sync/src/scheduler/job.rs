//! One registered recurring job and its fire handler.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cardpx_core::{BatchRunReport, JobSpec};
use tokio_cron_scheduler::{Job, JobSchedulerError};
use tokio_util::sync::CancellationToken;

use crate::runner::BatchRunner;

pub(super) struct RegisteredJob {
    pub(super) spec: JobSpec,
    /// False when the cron expression failed to parse.
    pub(super) valid: bool,
    pub(super) running: Arc<AtomicBool>,
    /// Fires skipped because the previous run was still in progress.
    pub(super) dropped_fires: Arc<AtomicU64>,
    pub(super) last_report: Arc<Mutex<Option<BatchRunReport>>>,
}

/// Clears a job's running flag when the fire completes or unwinds.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Parses `schedule` by building a throwaway job around it.
pub(super) fn validate_schedule(schedule: &str) -> Result<(), JobSchedulerError> {
    Job::new_async(schedule, |_uuid, _lock| Box::pin(async {})).map(|_| ())
}

impl RegisteredJob {
    pub(super) fn new(spec: JobSpec, valid: bool) -> Self {
        Self {
            spec,
            valid,
            running: Arc::new(AtomicBool::new(false)),
            dropped_fires: Arc::new(AtomicU64::new(0)),
            last_report: Arc::new(Mutex::new(None)),
        }
    }

    pub(super) fn last_report(&self) -> Option<BatchRunReport> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Builds the cron job that runs this job's batch on every fire.
    ///
    /// A fire that lands while the previous run of the same job is still in
    /// progress is dropped with a warning.
    pub(super) fn to_cron_job(
        &self,
        runner: &Arc<BatchRunner>,
        cancel: &CancellationToken,
    ) -> Result<Job, JobSchedulerError> {
        let runner = Arc::clone(runner);
        let cancel = cancel.clone();
        let running = Arc::clone(&self.running);
        let dropped_fires = Arc::clone(&self.dropped_fires);
        let last_report = Arc::clone(&self.last_report);
        let name = self.spec.name.clone();
        let selector = self.spec.selector.clone();
        let throttle = Duration::from_millis(self.spec.throttle_ms);

        Job::new_async(self.spec.schedule.as_str(), move |_uuid, _lock| {
            let runner = Arc::clone(&runner);
            let cancel = cancel.clone();
            let running = Arc::clone(&running);
            let dropped_fires = Arc::clone(&dropped_fires);
            let last_report = Arc::clone(&last_report);
            let name = name.clone();
            let selector = selector.clone();

            Box::pin(async move {
                if running.swap(true, Ordering::SeqCst) {
                    dropped_fires.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!(
                        job = %name,
                        "scheduler: previous run still in progress, dropping this fire"
                    );
                    return;
                }
                let _guard = RunningGuard(running);

                tracing::info!(job = %name, "scheduler: job fired");
                match runner.run_batch(&name, &selector, throttle, &cancel).await {
                    Ok(report) => {
                        *last_report.lock().unwrap_or_else(PoisonError::into_inner) =
                            Some(report);
                    }
                    Err(e) => {
                        tracing::error!(job = %name, error = %e, "scheduler: job run failed");
                    }
                }
            })
        })
    }
}
