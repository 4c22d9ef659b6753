use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::warn;

use docket_infra::config::string_var;
use docket_infra::jobs::WorkerConfig;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// API process settings.
///
/// Without `DATABASE_URL` the API keeps jobs in memory and runs an embedded
/// worker so enqueued jobs still execute.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    /// `None` keeps blobs in memory
    pub blob_root: Option<PathBuf>,
    pub worker: WorkerConfig,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_addr = SocketAddr::from(([0, 0, 0, 0], 8080));
        let bind_addr = match string_var(&lookup, "BIND_ADDR") {
            None => default_addr,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(value = %raw, default = DEFAULT_BIND_ADDR, "invalid BIND_ADDR; using default");
                default_addr
            }),
        };

        Self {
            bind_addr,
            database_url: string_var(&lookup, "DATABASE_URL"),
            blob_root: string_var(&lookup, "BLOB_ROOT").map(PathBuf::from),
            worker: WorkerConfig::from_lookup(&lookup).with_name("api-embedded-worker"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults() {
        let config = ApiConfig::from_lookup(|_| None);
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert!(config.database_url.is_none());
        assert!(config.blob_root.is_none());
        assert_eq!(config.worker.poll_interval, Duration::from_millis(2000));
    }

    #[test]
    fn overrides_and_bad_values() {
        let config = ApiConfig::from_lookup(|k| match k {
            "BIND_ADDR" => Some("localhost:nope".to_string()),
            "DATABASE_URL" => Some("postgres://db/docket".to_string()),
            "WORKER_POLL_INTERVAL_MS" => Some("100".to_string()),
            _ => None,
        });
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.database_url.as_deref(), Some("postgres://db/docket"));
        assert_eq!(config.worker.poll_interval, Duration::from_millis(100));
    }
}
