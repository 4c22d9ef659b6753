//! Standalone job worker: polls the Postgres job table and runs handlers.

use std::sync::Arc;

use anyhow::Context;

use docket_handlers::{default_registry, HandlerDeps};
use docket_infra::blob::FsBlobStore;
use docket_infra::config::WorkerProcessConfig;
use docket_infra::jobs::{PostgresJobStore, Worker};
use docket_infra::notify::LogNotifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    docket_observability::init_with_default("info,sqlx=warn");

    let config = WorkerProcessConfig::from_env().context("reading worker configuration")?;

    let store = PostgresJobStore::connect(&config.database_url, config.max_connections)
        .await
        .context("connecting to the job database")?;
    store.migrate().await.context("applying job migrations")?;

    let blobs = Arc::new(FsBlobStore::new(&config.blob_root));
    let blob_root = blobs.root().display().to_string();
    let deps = HandlerDeps::new(blobs, Arc::new(LogNotifier));
    let registry = default_registry(deps);

    let poll_interval = config.worker.poll_interval;
    let stale_after = config.worker.stale_after;
    tracing::info!(
        worker = %config.worker.name,
        ?poll_interval,
        ?stale_after,
        blob_root = %blob_root,
        job_types = ?registry.job_types(),
        "worker starting"
    );

    let handle = Worker::new(Arc::new(store), Arc::new(registry), config.worker).spawn();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    tracing::info!("shutdown requested; finishing in-flight job");

    let stats = handle.shutdown().await;
    tracing::info!(
        processed = stats.jobs_processed,
        succeeded = stats.jobs_succeeded,
        failed = stats.jobs_failed,
        "worker stopped"
    );
    Ok(())
}
