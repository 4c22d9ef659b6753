use anyhow::Context;

use docket_api::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    docket_observability::init();

    let config = ApiConfig::from_env();
    let runtime = docket_api::app::services::build_runtime(&config).await?;
    let app = docket_api::app::build_app(runtime.services.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .context("server error")?;

    if let Some(worker) = runtime.worker {
        worker.shutdown().await;
    }
    Ok(())
}
