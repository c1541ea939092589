//! Recurring sync jobs.
//!
//! The process entry point builds one [`SyncScheduler`], registers the job
//! table and starts it. Every fire runs one batch through the shared
//! [`BatchRunner`]; different jobs may overlap each other but never
//! themselves.

mod job;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use cardpx_core::{BatchRunReport, JobSpec};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_cron_scheduler::JobScheduler;
use tokio_util::sync::CancellationToken;

use self::job::{validate_schedule, RegisteredJob};
use crate::error::SyncError;
use crate::runner::BatchRunner;

/// Snapshot of one job for status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub schedule: String,
    pub enabled: bool,
    /// True while the scheduler is started and this job is armed.
    pub started: bool,
    /// True while a fire of this job is executing.
    pub running: bool,
    /// Fires dropped because the previous run had not finished.
    pub dropped_fires: u64,
    pub last_run: Option<BatchRunReport>,
}

struct Active {
    scheduler: JobScheduler,
    cancel: CancellationToken,
}

pub struct SyncScheduler {
    runner: Arc<BatchRunner>,
    jobs: Vec<RegisteredJob>,
    active: Mutex<Option<Active>>,
}

impl SyncScheduler {
    #[must_use]
    pub fn new(runner: Arc<BatchRunner>) -> Self {
        Self {
            runner,
            jobs: Vec::new(),
            active: Mutex::new(None),
        }
    }

    /// Adds a job to the table.
    ///
    /// An unparseable schedule does not fail registration: the job is kept
    /// disabled so it still appears in [`status`](Self::status).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DuplicateJob`] if a job with the same name is
    /// already registered.
    pub fn register(&mut self, spec: JobSpec) -> Result<(), SyncError> {
        if self.jobs.iter().any(|j| j.spec.name == spec.name) {
            return Err(SyncError::DuplicateJob(spec.name));
        }

        let valid = match validate_schedule(&spec.schedule) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    job = %spec.name,
                    schedule = %spec.schedule,
                    error = %e,
                    "scheduler: invalid schedule, registering job disabled"
                );
                false
            }
        };

        tracing::debug!(
            job = %spec.name,
            schedule = %spec.schedule,
            enabled = spec.enabled && valid,
            "scheduler: job registered"
        );
        self.jobs.push(RegisteredJob::new(spec, valid));
        Ok(())
    }

    /// Arms every enabled job. Calling this on a started scheduler logs a
    /// warning and changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Scheduler`] if the cron runtime cannot be created
    /// or refuses a job.
    pub async fn start(&self) -> Result<(), SyncError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            tracing::warn!("scheduler: already started, ignoring start request");
            return Ok(());
        }

        let scheduler = JobScheduler::new().await?;
        let cancel = CancellationToken::new();
        let mut armed = 0usize;

        for job in &self.jobs {
            if !job.spec.enabled {
                tracing::info!(job = %job.spec.name, "scheduler: job disabled by configuration");
                continue;
            }
            if !job.valid {
                continue;
            }
            scheduler
                .add(job.to_cron_job(&self.runner, &cancel)?)
                .await?;
            armed += 1;
        }

        scheduler.start().await?;
        tracing::info!(armed, registered = self.jobs.len(), "scheduler: started");
        *active = Some(Active { scheduler, cancel });
        Ok(())
    }

    /// Disarms all jobs and cancels in-flight runs. Runs stop before their
    /// next card; completed work is kept. A stopped scheduler is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Scheduler`] if the cron runtime fails to shut
    /// down cleanly.
    pub async fn stop(&self) -> Result<(), SyncError> {
        let Some(mut active) = self.active.lock().await.take() else {
            return Ok(());
        };
        active.cancel.cancel();
        active.scheduler.shutdown().await?;
        tracing::info!("scheduler: stopped");
        Ok(())
    }

    pub async fn is_started(&self) -> bool {
        self.active.lock().await.is_some()
    }

    pub async fn status(&self) -> Vec<JobStatus> {
        let started = self.is_started().await;
        self.jobs
            .iter()
            .map(|job| {
                let enabled = job.spec.enabled && job.valid;
                JobStatus {
                    name: job.spec.name.clone(),
                    schedule: job.spec.schedule.clone(),
                    enabled,
                    started: started && enabled,
                    running: job.running.load(Ordering::SeqCst),
                    dropped_fires: job.dropped_fires.load(Ordering::SeqCst),
                    last_run: job.last_report(),
                }
            })
            .collect()
    }
}
