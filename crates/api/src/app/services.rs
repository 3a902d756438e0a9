use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use tasksvc_infra::ServiceConfig;
use tasksvc_infra::jobs::{
    DynJobEngine, InMemoryJobStore, InMemoryWorkQueue, JobEngine, JobStore, PostgresJobStore,
    RedisWorkQueue, WorkQueue,
};
use tasksvc_jobs::{HandlerRegistry, RetryPolicy};
use tasksvc_observability::ServiceMetrics;

/// Shared state handed to every request handler.
pub struct AppServices {
    pub engine: Arc<DynJobEngine>,
    pub metrics: ServiceMetrics,
}

impl AppServices {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        policy: RetryPolicy,
        metrics: ServiceMetrics,
    ) -> Self {
        let engine = JobEngine::new(HandlerRegistry::with_builtin_handlers(), store, queue, policy)
            .with_metrics(metrics.clone());
        Self {
            engine: Arc::new(engine),
            metrics,
        }
    }

    /// In-memory store and queue (dev/test).
    pub fn in_memory(policy: RetryPolicy) -> anyhow::Result<Self> {
        let metrics = ServiceMetrics::new().context("failed to register metrics")?;
        Ok(Self::new(
            InMemoryJobStore::arc(),
            InMemoryWorkQueue::arc(),
            policy,
            metrics,
        ))
    }
}

/// Pick adapters from configuration and wire the engine.
pub async fn build_services(config: &ServiceConfig) -> anyhow::Result<AppServices> {
    let store = build_store(config).await?;
    let queue = build_queue(config).await?;
    let metrics = ServiceMetrics::new().context("failed to register metrics")?;
    Ok(AppServices::new(store, queue, config.retry.clone(), metrics))
}

async fn build_store(config: &ServiceConfig) -> anyhow::Result<Arc<dyn JobStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresJobStore::connect(url)
                .await
                .context("failed to connect to postgres")?;
            store.migrate().await.context("failed to migrate jobs schema")?;
            info!("using postgres job store");
            Ok(Arc::new(store))
        }
        None => {
            info!("DATABASE_URL not set; using in-memory job store");
            Ok(InMemoryJobStore::arc())
        }
    }
}

async fn build_queue(config: &ServiceConfig) -> anyhow::Result<Arc<dyn WorkQueue>> {
    match &config.redis_url {
        Some(url) => {
            let queue = RedisWorkQueue::new(url, &config.queue_name, config.worker_id.as_deref())
                .context("failed to configure redis queue")?;
            if config.worker_id.is_none() {
                warn!("WORKER_ID not set; in-flight items will not be recovered after a crash");
            }
            // Only this consumer's own processing list is requeued.
            queue
                .recover_inflight()
                .await
                .context("failed to recover in-flight work items")?;
            info!(queue = %config.queue_name, consumer = %queue.consumer(), "using redis work queue");
            Ok(Arc::new(queue))
        }
        None => {
            info!("REDIS_URL not set; using in-memory work queue");
            Ok(InMemoryWorkQueue::arc())
        }
    }
}
