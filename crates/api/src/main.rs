use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use tasksvc_api::app::{build_app, services::build_services};
use tasksvc_infra::ServiceConfig;
use tasksvc_infra::jobs::{WorkerConfig, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tasksvc_observability::init();

    // Reads `.env` from the working directory as a fallback.
    let config = ServiceConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(build_services(&config).await?);

    // Workers share the API's queue; with the in-memory queue this is the only consumer.
    let workers = (config.worker_concurrency > 0).then(|| {
        WorkerPool::spawn(
            services.engine.clone(),
            WorkerConfig::default().with_concurrency(config.worker_concurrency),
        )
    });

    let app = build_app(services);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(workers) = workers {
        workers.shutdown().await;
    }
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown requested");
}
