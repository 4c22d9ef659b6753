//! Polling worker: claim one job, run its handler, record the outcome.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use docket_core::{Job, JobId, JobStatus};

use super::registry::{HandlerRegistry, JobContext};
use super::store::{JobStore, JobStoreError, Recorded};

/// Default wait between claim attempts when the queue is empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to sleep when no job is available (or the store failed)
    pub poll_interval: Duration,
    /// Name for logging
    pub name: String,
    /// Requeue running jobs without a heartbeat for this long; `None` disables the reaper
    pub stale_after: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            name: "job-worker".to_string(),
            stale_after: None,
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }
}

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing was queued
    Idle,
    Succeeded(JobId),
    /// Handler failed; attempts remain
    Requeued(JobId),
    /// Handler failed on its last attempt
    Failed(JobId),
    /// The job was cancelled or retried while running; the outcome was dropped
    Superseded(JobId),
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_requeued: u64,
    pub jobs_failed: u64,
    pub jobs_superseded: u64,
    pub jobs_reaped: u64,
    pub store_errors: u64,
    pub uptime_secs: u64,
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the loop to stop.
    ///
    /// A job already claimed runs to completion and its outcome is recorded
    /// before the loop exits. Returns the final statistics.
    pub async fn shutdown(mut self) -> WorkerStats {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "job worker task ended abnormally");
            }
        }
        self.stats()
    }

    /// Get current worker statistics.
    pub fn stats(&self) -> WorkerStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

/// A handler outcome that has not been written to the store yet.
#[derive(Debug)]
struct PendingOutcome {
    id: JobId,
    attempt: u32,
    max_attempts: u32,
    outcome: Result<JsonValue, String>,
}

/// Background job worker.
///
/// Processes strictly one job at a time. Run several workers (processes or
/// tasks) only against a store whose `claim_next` is atomic.
pub struct Worker {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
    stats: Arc<Mutex<WorkerStats>>,
    pending: Mutex<Option<PendingOutcome>>,
}

impl Worker {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<HandlerRegistry>, config: WorkerConfig) -> Self {
        Self {
            store,
            registry,
            config,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
            pending: Mutex::new(None),
        }
    }

    /// Execute exactly one poll cycle.
    ///
    /// An outcome left unrecorded by an earlier store error is written first,
    /// and that write is the whole cycle. Store errors are returned as-is; the
    /// loop treats them as transient. Handler errors are recorded on the job
    /// and never returned.
    pub async fn run_once(&self) -> Result<PollOutcome, JobStoreError> {
        let outcome = match self.flush_pending().await? {
            Some(outcome) => outcome,
            None => {
                let Some(job) = self.store.claim_next().await? else {
                    return Ok(PollOutcome::Idle);
                };

                debug!(
                    worker = %self.config.name,
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempt = job.attempts,
                    "claimed job"
                );

                self.execute(job).await?
            }
        };

        self.update_stats(|s| {
            s.jobs_processed += 1;
            match outcome {
                PollOutcome::Succeeded(_) => s.jobs_succeeded += 1,
                PollOutcome::Requeued(_) => s.jobs_requeued += 1,
                PollOutcome::Failed(_) => s.jobs_failed += 1,
                PollOutcome::Superseded(_) => s.jobs_superseded += 1,
                PollOutcome::Idle => {}
            }
        });
        Ok(outcome)
    }

    async fn execute(&self, job: Job) -> Result<PollOutcome, JobStoreError> {
        let id = job.id;
        let attempt = job.attempts;
        let max_attempts = job.max_attempts;
        let ctx = JobContext::new(id, attempt, self.store.clone());
        let started = Instant::now();

        let outcome = match self.registry.dispatch(job, ctx).await {
            Ok(result) => {
                debug!(
                    job_id = %id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "job completed successfully"
                );
                Ok(result)
            }
            Err(err) => Err(err.to_string()),
        };

        let pending = PendingOutcome {
            id,
            attempt,
            max_attempts,
            outcome,
        };
        match self.record(&pending).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(job_id = %id, attempt, error = %e, "recording outcome failed; will retry");
                if let Ok(mut slot) = self.pending.lock() {
                    *slot = Some(pending);
                }
                Err(e)
            }
        }
    }

    /// Retry an outcome whose earlier write hit a store error.
    ///
    /// The write is fenced on `(id, attempt)`, so repeating it is safe.
    async fn flush_pending(&self) -> Result<Option<PollOutcome>, JobStoreError> {
        let pending = match self.pending.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(pending) = pending else {
            return Ok(None);
        };

        match self.record(&pending).await {
            Ok(outcome) => {
                info!(job_id = %pending.id, attempt = pending.attempt, "recorded deferred job outcome");
                Ok(Some(outcome))
            }
            Err(e) => {
                if let Ok(mut slot) = self.pending.lock() {
                    *slot = Some(pending);
                }
                Err(e)
            }
        }
    }

    async fn record(&self, pending: &PendingOutcome) -> Result<PollOutcome, JobStoreError> {
        let (id, attempt) = (pending.id, pending.attempt);

        match &pending.outcome {
            Ok(result) => {
                let recorded = self.store.record_success(id, attempt, result.clone()).await?;
                Ok(outcome_for(id, recorded))
            }
            Err(message) => {
                let recorded = self
                    .store
                    .record_failure(id, attempt, message, pending.max_attempts)
                    .await?;
                match recorded {
                    Recorded::Applied(JobStatus::Failed) => {
                        warn!(job_id = %id, attempt, error = %message, "job failed permanently");
                    }
                    _ => {
                        debug!(job_id = %id, attempt, error = %message, "job attempt failed");
                    }
                }
                Ok(outcome_for(id, recorded))
            }
        }
    }

    /// Requeue running jobs whose heartbeat is older than `stale_after`.
    pub async fn reap_stale(&self, stale_after: Duration) -> Result<Vec<JobId>, JobStoreError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(stale_after).unwrap_or_default();
        let recovered = self.store.requeue_stale(cutoff).await?;
        if !recovered.is_empty() {
            warn!(worker = %self.config.name, count = recovered.len(), "requeued stale running jobs");
            self.update_stats(|s| s.jobs_reaped += recovered.len() as u64);
        }
        Ok(recovered)
    }

    /// Spawn the worker loop on the current tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let join = tokio::spawn(worker_loop(self, shutdown_rx));

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }

    fn update_stats(&self, f: impl FnOnce(&mut WorkerStats)) {
        if let Ok(mut s) = self.stats.lock() {
            f(&mut s);
        }
    }
}

fn outcome_for(id: JobId, recorded: Recorded) -> PollOutcome {
    match recorded {
        Recorded::Applied(JobStatus::Succeeded) => PollOutcome::Succeeded(id),
        Recorded::Applied(JobStatus::Queued) => PollOutcome::Requeued(id),
        Recorded::Applied(_) => PollOutcome::Failed(id),
        Recorded::Superseded => PollOutcome::Superseded(id),
    }
}

async fn worker_loop(worker: Worker, mut shutdown_rx: watch::Receiver<bool>) {
    info!(
        worker = %worker.config.name,
        poll_interval_ms = worker.config.poll_interval.as_millis() as u64,
        "job worker started"
    );
    let start_time = Instant::now();
    let mut last_reap: Option<Instant> = None;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        worker.update_stats(|s| s.uptime_secs = start_time.elapsed().as_secs());

        if let Some(stale_after) = worker.config.stale_after {
            if last_reap.is_none_or(|at| at.elapsed() >= stale_after) {
                last_reap = Some(Instant::now());
                if let Err(e) = worker.reap_stale(stale_after).await {
                    error!(worker = %worker.config.name, error = %e, "failed to requeue stale jobs");
                    worker.update_stats(|s| s.store_errors += 1);
                }
            }
        }

        let idle = match worker.run_once().await {
            Ok(PollOutcome::Idle) => true,
            Ok(_) => false,
            Err(e) => {
                error!(worker = %worker.config.name, error = %e, "job store error; backing off");
                worker.update_stats(|s| s.store_errors += 1);
                true
            }
        };

        if idle {
            tokio::select! {
                _ = tokio::time::sleep(worker.config.poll_interval) => {}
                _ = shutdown_rx.changed() => {}
            }
        }
    }

    if let Err(e) = worker.flush_pending().await {
        error!(worker = %worker.config.name, error = %e, "job outcome left unrecorded at shutdown");
    }
    info!(worker = %worker.config.name, "job worker stopped");
}
