//! `docket-core`: job queue domain building blocks.
//!
//! This crate contains the **pure** job model (no storage, no runtime): the job
//! record, its status machine, and the error types shared by stores, handlers
//! and the HTTP surface.

pub mod error;
pub mod id;
pub mod job;

pub use error::{DomainError, DomainResult, JobError};
pub use id::JobId;
pub use job::{
    Job, JobFilter, JobStats, JobStatus, NewJob, DEFAULT_MAX_ATTEMPTS, UNKNOWN_JOB_TYPE_MESSAGE,
};
