//! HTTP API for enqueueing and inspecting background jobs.

pub mod app;
pub mod config;
pub mod middleware;
