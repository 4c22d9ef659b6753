//! Infrastructure layer: job stores, the worker loop, and the collaborators
//! job handlers call into (blob storage, notifications).

pub mod blob;
pub mod config;
pub mod jobs;
pub mod notify;
