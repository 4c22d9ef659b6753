//! Job storage contract and the in-memory implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use docket_core::{Job, JobFilter, JobId, JobStats, JobStatus, NewJob};

/// Outcome of a fenced write (`record_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// The write applied; the row now has this status.
    Applied(JobStatus),
    /// The claim no longer owns the row (cancelled, retried or reaped); nothing changed.
    Superseded,
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {id} is already {status}")]
    AlreadyTerminal { id: JobId, status: JobStatus },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Persistent job table.
///
/// All coordination between the API and workers funnels through this trait:
/// claim exclusivity and status transitions are the store's job, never an
/// in-process lock held by callers.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new row in `queued` with `attempts = 0`.
    async fn create(&self, new_job: NewJob) -> Result<Job, JobStoreError>;

    /// Atomically take the oldest queued job (by `created_at`, then id),
    /// mark it running and bump `attempts`. Exclusive across concurrent callers.
    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError>;

    /// Running -> Succeeded, fenced on `(id, attempt)`.
    async fn record_success(
        &self,
        id: JobId,
        attempt: u32,
        result: JsonValue,
    ) -> Result<Recorded, JobStoreError>;

    /// Running -> Queued (attempt < max_attempts) or Failed, fenced on `(id, attempt)`.
    async fn record_failure(
        &self,
        id: JobId,
        attempt: u32,
        error: &str,
        max_attempts: u32,
    ) -> Result<Recorded, JobStoreError>;

    /// Store an advisory progress value and bump `updated_at`, fenced on `(id, attempt)`.
    async fn record_progress(
        &self,
        id: JobId,
        attempt: u32,
        progress: u8,
    ) -> Result<Recorded, JobStoreError>;

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Newest first.
    async fn list(
        &self,
        filter: &JobFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Job>, JobStoreError>;

    async fn count(&self, filter: &JobFilter) -> Result<u64, JobStoreError>;

    /// Operator retry: any existing job back to `queued`, error cleared.
    async fn retry(&self, id: JobId) -> Result<Job, JobStoreError>;

    /// Operator cancel: `queued`/`running` -> `failed` with error `"cancelled"`.
    async fn cancel(&self, id: JobId) -> Result<Job, JobStoreError>;

    /// Requeue (or fail, once attempts are spent) running jobs whose
    /// `updated_at` is older than `stale_before`.
    async fn requeue_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<JobId>, JobStoreError>;

    async fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Error recorded on jobs recovered by the stale-job reaper.
pub const STALE_ERROR: &str = "stale: worker lost";

#[derive(Debug, Default)]
struct MemoryState {
    jobs: BTreeMap<JobId, Job>,
    next_id: i64,
}

/// In-memory job store for tests/dev.
///
/// One mutex guards the whole table, which makes `claim_next` trivially
/// exclusive within the process.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    state: Mutex<MemoryState>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, JobStoreError> {
        self.state
            .lock()
            .map_err(|_| JobStoreError::Storage("in-memory job store lock poisoned".to_string()))
    }

    fn fenced<F>(&self, id: JobId, attempt: u32, apply: F) -> Result<Recorded, JobStoreError>
    where
        F: FnOnce(&mut Job) -> JobStatus,
    {
        let mut state = self.lock()?;
        match state.jobs.get_mut(&id) {
            Some(job) if job.is_claimed_by(attempt) => Ok(Recorded::Applied(apply(job))),
            Some(_) => Ok(Recorded::Superseded),
            None => Err(JobStoreError::NotFound(id)),
        }
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, new_job: NewJob) -> Result<Job, JobStoreError> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let job = new_job.into_job(JobId::new(state.next_id), Utc::now());
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        let mut state = self.lock()?;

        // Oldest queued job; id breaks created_at ties.
        let next = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            state.jobs.get_mut(&id).map(|job| {
                job.mark_claimed(Utc::now());
                job.clone()
            })
        }))
    }

    async fn record_success(
        &self,
        id: JobId,
        attempt: u32,
        result: JsonValue,
    ) -> Result<Recorded, JobStoreError> {
        self.fenced(id, attempt, |job| {
            job.mark_succeeded(result, Utc::now());
            job.status
        })
    }

    async fn record_failure(
        &self,
        id: JobId,
        attempt: u32,
        error: &str,
        max_attempts: u32,
    ) -> Result<Recorded, JobStoreError> {
        self.fenced(id, attempt, |job| {
            job.mark_attempt_failed(error, max_attempts, Utc::now())
        })
    }

    async fn record_progress(
        &self,
        id: JobId,
        attempt: u32,
        progress: u8,
    ) -> Result<Recorded, JobStoreError> {
        self.fenced(id, attempt, |job| {
            job.mark_progress(progress, Utc::now());
            job.status
        })
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }

    async fn list(
        &self,
        filter: &JobFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Job>, JobStoreError> {
        let state = self.lock()?;
        let mut result: Vec<_> = state
            .jobs
            .values()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect();

        result.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(result
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count(&self, filter: &JobFilter) -> Result<u64, JobStoreError> {
        let state = self.lock()?;
        Ok(state.jobs.values().filter(|j| filter.matches(j)).count() as u64)
    }

    async fn retry(&self, id: JobId) -> Result<Job, JobStoreError> {
        let mut state = self.lock()?;
        let job = state.jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        job.mark_retried(Utc::now());
        Ok(job.clone())
    }

    async fn cancel(&self, id: JobId) -> Result<Job, JobStoreError> {
        let mut state = self.lock()?;
        let job = state.jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        job.mark_cancelled(Utc::now())
            .map_err(|status| JobStoreError::AlreadyTerminal { id, status })?;
        Ok(job.clone())
    }

    async fn requeue_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<JobId>, JobStoreError> {
        let mut state = self.lock()?;
        let now = Utc::now();
        let mut recovered = Vec::new();

        for job in state.jobs.values_mut() {
            if job.status == JobStatus::Running && job.updated_at < stale_before {
                let max_attempts = job.max_attempts;
                job.mark_attempt_failed(STALE_ERROR, max_attempts, now);
                recovered.push(job.id);
            }
        }

        Ok(recovered)
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let state = self.lock()?;
        let mut stats = JobStats::default();
        for job in state.jobs.values() {
            stats.add(job.status, 1);
        }
        Ok(stats)
    }
}
