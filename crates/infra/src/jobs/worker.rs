//! Worker pool: independent dequeue loops driving the job engine.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tasksvc_jobs::JobStatus;

use super::engine::{JobEngine, ProcessOutcome};
use super::queue::{QueueError, WorkQueue};
use super::store::JobStore;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent dequeue loops
    pub concurrency: usize,
    /// How long one dequeue call waits for an item
    pub poll_interval: Duration,
    /// Pause after a queue error before polling again
    pub error_backoff: Duration,
    /// Name prefix for logging
    pub name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_millis(500),
            name: "tasksvc-worker".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_compensated: u64,
    pub jobs_failed: u64,
    /// Redeliveries of finished jobs and items for unknown jobs
    pub items_skipped: u64,
    /// Passes aborted by a store or queue error
    pub errors: u64,
    pub uptime_secs: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: ProcessOutcome) {
        match outcome {
            ProcessOutcome::Missing | ProcessOutcome::AlreadyTerminal(_) => {
                self.items_skipped += 1;
            }
            ProcessOutcome::Finished(status) => {
                self.jobs_processed += 1;
                match status {
                    JobStatus::Succeeded => self.jobs_succeeded += 1,
                    JobStatus::Compensated => self.jobs_compensated += 1,
                    JobStatus::Failed => self.jobs_failed += 1,
                    JobStatus::Queued | JobStatus::Running => {}
                }
            }
        }
    }
}

struct SharedStats {
    started: Instant,
    stats: Mutex<WorkerStats>,
}

impl SharedStats {
    fn update(&self, f: impl FnOnce(&mut WorkerStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut stats);
    }

    fn snapshot(&self) -> WorkerStats {
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

/// Handle to control a running worker pool.
pub struct WorkerPoolHandle {
    shutdown: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    stats: Arc<SharedStats>,
}

impl WorkerPoolHandle {
    /// Request graceful shutdown and wait for in-flight passes to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "worker task panicked");
            }
        }
    }

    /// Get current pool statistics.
    pub fn stats(&self) -> WorkerStats {
        self.stats.snapshot()
    }

    pub fn workers(&self) -> usize {
        self.joins.len()
    }
}

/// Spawns worker loops onto the current tokio runtime.
pub struct WorkerPool;

impl WorkerPool {
    pub fn spawn<S, Q>(engine: Arc<JobEngine<S, Q>>, config: WorkerConfig) -> WorkerPoolHandle
    where
        S: JobStore + 'static,
        Q: WorkQueue + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(SharedStats {
            started: Instant::now(),
            stats: Mutex::new(WorkerStats::default()),
        });

        let concurrency = config.concurrency.max(1);
        let joins = (0..concurrency)
            .map(|index| {
                let worker = format!("{}-{}", config.name, index);
                tokio::spawn(worker_loop(
                    engine.clone(),
                    worker,
                    config.clone(),
                    shutdown_rx.clone(),
                    stats.clone(),
                ))
            })
            .collect();

        info!(name = %config.name, concurrency, "worker pool started");
        WorkerPoolHandle {
            shutdown: shutdown_tx,
            joins,
            stats,
        }
    }
}

async fn worker_loop<S, Q>(
    engine: Arc<JobEngine<S, Q>>,
    worker: String,
    config: WorkerConfig,
    shutdown: watch::Receiver<bool>,
    stats: Arc<SharedStats>,
) where
    S: JobStore,
    Q: WorkQueue,
{
    debug!(worker = %worker, "worker started");

    loop {
        let stopping = *shutdown.borrow();
        if stopping {
            break;
        }

        let delivery = match engine.queue().dequeue(config.poll_interval).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => continue,
            Err(QueueError::Closed) => {
                warn!(worker = %worker, "queue closed, worker exiting");
                break;
            }
            Err(e) => {
                error!(worker = %worker, error = %e, "dequeue failed");
                stats.update(|s| s.errors += 1);
                tokio::time::sleep(config.error_backoff).await;
                continue;
            }
        };

        match engine.process_job(&delivery.item).await {
            Ok(outcome) => {
                stats.update(|s| s.record(outcome));
                if let Err(e) = engine.queue().ack(&delivery).await {
                    warn!(worker = %worker, job_id = %delivery.item.job_id, error = %e, "ack failed");
                }
            }
            Err(e) => {
                // Left unacked so the broker can redeliver it.
                error!(worker = %worker, job_id = %delivery.item.job_id, error = %e, "processing pass aborted");
                stats.update(|s| s.errors += 1);
            }
        }
    }

    debug!(worker = %worker, "worker stopped");
}
