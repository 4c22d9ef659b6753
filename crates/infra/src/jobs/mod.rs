//! Background job system: durable queue, handler registry, polling worker.
//!
//! ## Design
//!
//! - Jobs are rows in a store; status moves `queued -> running -> {succeeded | queued | failed}`
//! - A worker claims one job at a time, oldest first, and records the outcome
//! - Failed attempts are requeued until `max_attempts`, then become terminal
//! - Outcome writes are fenced on `(id, attempts)`, so cancel/retry always win
//!
//! ## Components
//!
//! - `JobStore`: persistence (in-memory or Postgres)
//! - `HandlerRegistry`: job type -> `JobHandler`
//! - `Worker`: the polling scheduler

pub mod postgres;
pub mod registry;
pub mod store;
pub mod worker;

pub use postgres::PostgresJobStore;
pub use registry::{decode_payload, FnHandler, HandlerRegistry, JobContext, JobHandler};
pub use store::{InMemoryJobStore, JobStore, JobStoreError, Recorded, STALE_ERROR};
pub use worker::{
    PollOutcome, Worker, WorkerConfig, WorkerHandle, WorkerStats, DEFAULT_POLL_INTERVAL,
};
