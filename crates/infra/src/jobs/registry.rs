//! Handler registry: job type string -> handler.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use docket_core::{Job, JobError, JobId, UNKNOWN_JOB_TYPE_MESSAGE};

use super::store::{JobStore, JobStoreError, Recorded};

/// Per-execution context handed to a handler.
///
/// Carries the claim fence so progress writes from a superseded execution are
/// dropped by the store.
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    attempt: u32,
    store: Arc<dyn JobStore>,
}

impl JobContext {
    pub fn new(job_id: JobId, attempt: u32, store: Arc<dyn JobStore>) -> Self {
        Self {
            job_id,
            attempt,
            store,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record advisory progress (0-100).
    ///
    /// Returns `Recorded::Superseded` once the job was cancelled or retried;
    /// handlers may use that as a cooperative stop signal.
    pub async fn report_progress(&self, progress: u8) -> Result<Recorded, JobStoreError> {
        self.store
            .record_progress(self.job_id, self.attempt, progress)
            .await
    }

    /// Like `report_progress`, but a store failure is only logged.
    pub async fn report_progress_lossy(&self, progress: u8) {
        if let Err(e) = self.report_progress(progress).await {
            debug!(job_id = %self.job_id, error = %e, "progress update dropped");
        }
    }
}

/// Behavior for one job type.
///
/// Handlers must be safe under at-least-once execution and never touch job
/// status themselves; the worker records the outcome.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job, ctx: &JobContext) -> Result<JsonValue, JobError>;
}

/// Adapter turning an async closure into a `JobHandler`.
pub struct FnHandler<F> {
    f: F,
}

#[async_trait::async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Job, JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JsonValue, JobError>> + Send,
{
    async fn handle(&self, job: &Job, ctx: &JobContext) -> Result<JsonValue, JobError> {
        (self.f)(job.clone(), ctx.clone()).await
    }
}

/// Registry mapping job type strings to handlers.
///
/// New job types are added through `register`; the worker never changes.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `job_type`.
    pub fn register<H>(&mut self, job_type: impl Into<String>, handler: H) -> &mut Self
    where
        H: JobHandler + 'static,
    {
        self.handlers.insert(job_type.into(), Arc::new(handler));
        self
    }

    /// Register an async closure as a handler.
    pub fn register_fn<F, Fut>(&mut self, job_type: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Job, JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JsonValue, JobError>> + Send + 'static,
    {
        self.register(job_type, FnHandler { f })
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Run the handler for `job` on its own task.
    ///
    /// A panic inside the handler surfaces as `JobError::Panicked` instead of
    /// unwinding into the worker loop. Unknown types resolve to a no-op
    /// success so a typo cannot poison the queue.
    pub async fn dispatch(&self, job: Job, ctx: JobContext) -> Result<JsonValue, JobError> {
        let Some(handler) = self.get(&job.job_type) else {
            warn!(job_id = %job.id, job_type = %job.job_type, "no handler registered for job type");
            return Ok(json!({ "message": UNKNOWN_JOB_TYPE_MESSAGE }));
        };

        let task = tokio::spawn(async move { handler.handle(&job, &ctx).await });

        match task.await {
            Ok(outcome) => outcome,
            Err(join_err) if join_err.is_panic() => {
                let panic = join_err.into_panic();
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                Err(JobError::Panicked(message))
            }
            Err(join_err) => Err(JobError::failed(format!("handler task aborted: {join_err}"))),
        }
    }
}

/// Decode a job payload into the handler's own schema.
///
/// Malformed payloads become `JobError::InvalidPayload` naming the job type,
/// never a bare serde error.
pub fn decode_payload<T: DeserializeOwned>(job: &Job) -> Result<T, JobError> {
    serde_json::from_value(job.payload.clone())
        .map_err(|e| JobError::invalid_payload(format!("{}: {}", job.job_type, e)))
}
