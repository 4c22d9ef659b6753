//! Environment-driven configuration.
//!
//! Values are read through a lookup function so they can be tested without
//! touching the process environment. An invalid optional value falls back to
//! its default with a warning; a missing required value is an error.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::jobs::{WorkerConfig, DEFAULT_POLL_INTERVAL};

pub const DEFAULT_BLOB_ROOT: &str = "./data/blobs";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Non-empty string value of `var`.
pub fn string_var<F>(lookup: &F, var: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Millisecond duration in `var`, `default` when unset or unparsable.
pub fn duration_ms_var<F>(lookup: &F, var: &'static str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    match optional_duration_ms_var(lookup, var) {
        Ok(Some(d)) => d,
        Ok(None) => default,
        Err(e) => {
            let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
            warn!(error = %e, default_ms, "using default");
            default
        }
    }
}

/// Millisecond duration in `var`; zero and garbage are rejected.
pub fn optional_duration_ms_var<F>(
    lookup: &F,
    var: &'static str,
) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = string_var(lookup, var) else {
        return Ok(None);
    };
    match raw.parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Some(Duration::from_millis(ms))),
        _ => Err(ConfigError::Invalid { var, value: raw }),
    }
}

impl WorkerConfig {
    /// `WORKER_POLL_INTERVAL_MS`, `JOB_STALE_AFTER_MS`, `WORKER_NAME`.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = WorkerConfig::default().with_poll_interval(duration_ms_var(
            &lookup,
            "WORKER_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL,
        ));

        if let Some(name) = string_var(&lookup, "WORKER_NAME") {
            config = config.with_name(name);
        }

        match optional_duration_ms_var(&lookup, "JOB_STALE_AFTER_MS") {
            Ok(Some(stale_after)) => config = config.with_stale_after(stale_after),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "stale-job reaper disabled"),
        }

        config
    }
}

/// Settings for the standalone worker process.
#[derive(Debug, Clone)]
pub struct WorkerProcessConfig {
    pub database_url: String,
    pub blob_root: PathBuf,
    pub max_connections: u32,
    pub worker: WorkerConfig,
}

impl WorkerProcessConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            string_var(&lookup, "DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let blob_root = string_var(&lookup, "BLOB_ROOT")
            .unwrap_or_else(|| DEFAULT_BLOB_ROOT.to_string())
            .into();
        let max_connections = match string_var(&lookup, "DATABASE_MAX_CONNECTIONS") {
            None => 5,
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    warn!(value = %raw, "invalid DATABASE_MAX_CONNECTIONS; using 5");
                    5
                }
            },
        };

        Ok(Self {
            database_url,
            blob_root,
            max_connections,
            worker: WorkerConfig::from_lookup(lookup),
        })
    }
}
