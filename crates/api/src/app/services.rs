use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use docket_handlers::{default_registry, HandlerDeps};
use docket_infra::blob::{BlobStore, FsBlobStore, InMemoryBlobStore};
use docket_infra::jobs::{
    InMemoryJobStore, JobStore, PostgresJobStore, Worker, WorkerConfig, WorkerHandle,
};
use docket_infra::notify::LogNotifier;

use crate::config::ApiConfig;

const API_POOL_SIZE: u32 = 5;

/// Shared state behind every route.
pub struct AppServices {
    store: Arc<dyn JobStore>,
}

impl AppServices {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }
}

/// Services plus the embedded worker, if one is running.
pub struct Runtime {
    pub services: Arc<AppServices>,
    pub worker: Option<WorkerHandle>,
}

/// Choose persistent or in-memory wiring from the config.
pub async fn build_runtime(config: &ApiConfig) -> anyhow::Result<Runtime> {
    if let Some(url) = &config.database_url {
        let store = PostgresJobStore::connect(url, API_POOL_SIZE)
            .await
            .context("connecting to the job database")?;
        store.migrate().await.context("applying job migrations")?;
        info!("using postgres job store; run docket-worker to execute jobs");

        return Ok(Runtime {
            services: Arc::new(AppServices::new(Arc::new(store))),
            worker: None,
        });
    }

    warn!("DATABASE_URL not set; jobs are kept in memory and lost on restart");
    let blobs: Arc<dyn BlobStore> = match &config.blob_root {
        Some(root) => Arc::new(FsBlobStore::new(root)),
        None => Arc::new(InMemoryBlobStore::new()),
    };
    Ok(embedded_runtime(InMemoryJobStore::arc(), blobs, config.worker.clone()))
}

/// In-process store with a worker executing the built-in handlers.
pub fn embedded_runtime(
    store: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    worker_config: WorkerConfig,
) -> Runtime {
    let registry = default_registry(HandlerDeps::new(blobs, Arc::new(LogNotifier)));
    let worker = Worker::new(store.clone(), Arc::new(registry), worker_config).spawn();

    Runtime {
        services: Arc::new(AppServices::new(store)),
        worker: Some(worker),
    }
}
