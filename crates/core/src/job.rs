//! The job record and its status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// Attempt ceiling applied when the enqueuer does not set one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Result message recorded for jobs whose type has no registered handler.
pub const UNKNOWN_JOB_TYPE_MESSAGE: &str = "unknown job type";

/// Error text recorded on operator cancellation.
pub const CANCELLED_ERROR: &str = "cancelled";

/// Job execution status.
///
/// `Queued` and `Running` are the only non-terminal states.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed by a worker
    Queued,
    /// Claimed by a worker and executing
    Running,
    /// Handler returned a result
    Succeeded,
    /// Attempts exhausted, or cancelled
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Validated request to create a job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    job_type: String,
    payload: JsonValue,
    max_attempts: u32,
}

impl NewJob {
    /// Validate and build a new job request. Rejects a blank `job_type`.
    pub fn new(job_type: impl Into<String>, payload: JsonValue) -> DomainResult<Self> {
        let job_type = job_type.into().trim().to_string();
        if job_type.is_empty() {
            return Err(DomainError::validation("job type is required"));
        }
        Ok(Self {
            job_type,
            payload,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    /// Override the attempt ceiling. Must be at least 1.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> DomainResult<Self> {
        if max_attempts == 0 {
            return Err(DomainError::validation("maxAttempts must be at least 1"));
        }
        self.max_attempts = max_attempts;
        Ok(self)
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Materialize the row a store inserts for this request.
    pub fn into_job(self, id: JobId, now: DateTime<Utc>) -> Job {
        Job {
            id,
            job_type: self.job_type,
            payload: self.payload,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: self.max_attempts,
            result: None,
            error: None,
            progress: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }
}

/// A background job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    /// Handler discriminator
    #[serde(rename = "type")]
    pub job_type: String,
    /// Handler input; never read by the scheduler
    pub payload: JsonValue,
    pub status: JobStatus,
    /// Claims so far (incremented at claim time)
    pub attempts: u32,
    pub max_attempts: u32,
    /// Handler output, present only once succeeded
    pub result: Option<JsonValue>,
    /// Last failure message
    pub error: Option<String>,
    /// Advisory completion hint, 0-100
    pub progress: Option<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Whether the claim identified by `attempt` still owns this row.
    ///
    /// Every claim bumps `attempts`, so `(id, attempts)` fences writes from
    /// a claim that was cancelled, retried or reaped in the meantime.
    pub fn is_claimed_by(&self, attempt: u32) -> bool {
        self.status == JobStatus::Running && self.attempts == attempt
    }

    /// Queued -> Running.
    pub fn mark_claimed(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.attempts += 1;
        self.progress = None;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    /// Running -> Succeeded.
    pub fn mark_succeeded(&mut self, result: JsonValue, now: DateTime<Utc>) {
        self.status = JobStatus::Succeeded;
        self.result = Some(result);
        self.error = None;
        self.progress = Some(100);
        self.updated_at = now;
        self.finished_at = Some(now);
    }

    /// Running -> Queued while attempts remain, otherwise Running -> Failed.
    pub fn mark_attempt_failed(
        &mut self,
        error: impl Into<String>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> JobStatus {
        self.error = Some(error.into());
        self.updated_at = now;
        if self.attempts < max_attempts {
            self.status = JobStatus::Queued;
        } else {
            self.status = JobStatus::Failed;
            self.finished_at = Some(now);
        }
        self.status
    }

    /// Record an advisory progress value (clamped to 100).
    pub fn mark_progress(&mut self, progress: u8, now: DateTime<Utc>) {
        self.progress = Some(progress.min(100));
        self.updated_at = now;
    }

    /// Operator retry: back to Queued with the error cleared.
    ///
    /// `attempts` is preserved, so a job that already used its ceiling gets
    /// exactly one more claim before failing again.
    pub fn mark_retried(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Queued;
        self.error = None;
        self.result = None;
        self.progress = None;
        self.updated_at = now;
        self.finished_at = None;
    }

    /// Operator cancel. Returns the blocking status when already terminal.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> Result<(), JobStatus> {
        if self.status.is_terminal() {
            return Err(self.status);
        }
        self.status = JobStatus::Failed;
        self.error = Some(CANCELLED_ERROR.to_string());
        self.updated_at = now;
        self.finished_at = Some(now);
        Ok(())
    }
}

/// Filter for inspection queries. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<String>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.status.is_none_or(|s| job.status == s)
            && self
                .job_type
                .as_deref()
                .is_none_or(|t| job.job_type == t)
    }
}

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub queued: u64,
    pub running: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl JobStats {
    pub fn add(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Queued => self.queued += count,
            JobStatus::Running => self.running += count,
            JobStatus::Succeeded => self.succeeded += count,
            JobStatus::Failed => self.failed += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.queued + self.running + self.succeeded + self.failed
    }
}
