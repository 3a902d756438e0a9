//! Standalone worker process: drains the shared queue without serving HTTP.

use anyhow::Context;
use tracing::{error, info};

use tasksvc_api::app::services::build_services;
use tasksvc_infra::ServiceConfig;
use tasksvc_infra::jobs::{WorkerConfig, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tasksvc_observability::init();

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    config
        .require_shared_backends()
        .context("standalone worker misconfigured")?;
    let services = build_services(&config).await?;

    let concurrency = config.worker_concurrency.max(1);
    let pool = WorkerPool::spawn(
        services.engine.clone(),
        WorkerConfig::default().with_concurrency(concurrency),
    );
    info!(concurrency, "worker running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown requested, draining workers");

    let stats = pool.stats();
    pool.shutdown().await;
    info!(
        processed = stats.jobs_processed,
        succeeded = stats.jobs_succeeded,
        compensated = stats.jobs_compensated,
        failed = stats.jobs_failed,
        "worker stopped"
    );
    Ok(())
}
