//! Redis list-backed work queue (durable, at-least-once delivery).
//!
//! ## Layout
//!
//! - **Pending list**: `<name>:pending`, producers `LPUSH` serialized items
//! - **Processing list**: `<name>:processing:<consumer>`, one per consumer;
//!   `BRPOPLPUSH` moves an item here atomically when a worker takes it
//! - **Ack**: `LREM` removes the raw item from the consumer's processing list
//!
//! A consumer id must be unique among live processes. Items a crashed process
//! left in its processing list are moved back to pending by
//! [`RedisWorkQueue::recover_inflight`] when a process with the same consumer
//! id starts again. Lists of other consumers are never touched, so starting a
//! new process cannot hand a running job to a second worker.
//!
//! The `redis` client is used synchronously inside `spawn_blocking`. Idle
//! connections are kept and reused, so each busy worker loop holds one.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use super::queue::{Delivery, QueueError, WorkItem, WorkQueue};

#[derive(Clone)]
pub struct RedisWorkQueue {
    client: Arc<redis::Client>,
    idle: Arc<Mutex<Vec<redis::Connection>>>,
    consumer: String,
    pending_key: String,
    processing_key: String,
}

impl fmt::Debug for RedisWorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisWorkQueue")
            .field("consumer", &self.consumer)
            .field("pending_key", &self.pending_key)
            .field("processing_key", &self.processing_key)
            .finish_non_exhaustive()
    }
}

impl RedisWorkQueue {
    /// Create a queue named `name` on the Redis server at `redis_url`.
    ///
    /// `consumer` names this process's processing list. Without one a fresh
    /// id is generated, and items in flight when the process dies are not
    /// recovered by a restart.
    pub fn new(
        redis_url: impl AsRef<str>,
        name: &str,
        consumer: Option<&str>,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        let consumer = consumer
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

        Ok(Self {
            client: Arc::new(client),
            idle: Arc::new(Mutex::new(Vec::new())),
            pending_key: format!("{name}:pending"),
            processing_key: format!("{name}:processing:{consumer}"),
            consumer,
        })
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn pending_key(&self) -> &str {
        &self.pending_key
    }

    pub fn processing_key(&self) -> &str {
        &self.processing_key
    }

    /// Connections currently parked for reuse.
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Move this consumer's unacknowledged items back to pending.
    ///
    /// Returns the number of items moved. Call it before this process starts
    /// dequeuing; other consumers' lists are left alone.
    pub async fn recover_inflight(&self) -> Result<usize, QueueError> {
        let this = self.clone();
        let moved = blocking(move || {
            this.with_connection(|conn| {
                let mut moved = 0usize;
                loop {
                    let item: Option<String> = redis::cmd("RPOPLPUSH")
                        .arg(&this.processing_key)
                        .arg(&this.pending_key)
                        .query(conn)
                        .map_err(command_error)?;
                    if item.is_none() {
                        break;
                    }
                    moved += 1;
                }
                Ok(moved)
            })
        })
        .await?;

        if moved > 0 {
            info!(queue = %self.processing_key, moved, "recovered in-flight work items");
        }
        Ok(moved)
    }

    /// Run `f` on a pooled connection, opening one if none is idle.
    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut redis::Connection) -> Result<T, QueueError>,
    ) -> Result<T, QueueError> {
        let pooled = self.idle.lock().unwrap_or_else(|e| e.into_inner()).pop();
        let mut conn = match pooled {
            Some(conn) => conn,
            None => self
                .client
                .get_connection()
                .map_err(|e| QueueError::Connection(e.to_string()))?,
        };

        let result = f(&mut conn);
        // A connection that failed a command may be broken; let it drop.
        if result.is_ok() {
            self.idle.lock().unwrap_or_else(|e| e.into_inner()).push(conn);
        }
        result
    }

    fn remove_inflight(&self, conn: &mut redis::Connection, raw: &str) -> Result<(), QueueError> {
        let _: i64 = redis::cmd("LREM")
            .arg(&self.processing_key)
            .arg(1)
            .arg(raw)
            .query(conn)
            .map_err(command_error)?;
        Ok(())
    }
}

fn command_error(err: redis::RedisError) -> QueueError {
    QueueError::Command(err.to_string())
}

async fn blocking<T, F>(f: F) -> Result<T, QueueError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, QueueError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| QueueError::Command(format!("redis task failed: {e}")))?
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    #[instrument(skip(self, item), fields(queue = %self.pending_key, job_id = %item.job_id), err)]
    async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        let raw = serde_json::to_string(&item)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        let this = self.clone();
        blocking(move || {
            this.with_connection(|conn| {
                let _: i64 = redis::cmd("LPUSH")
                    .arg(&this.pending_key)
                    .arg(&raw)
                    .query(conn)
                    .map_err(command_error)?;
                Ok(())
            })
        })
        .await
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        // BRPOPLPUSH takes whole seconds; zero would block forever.
        let timeout_secs = wait.as_secs().max(1);
        let this = self.clone();
        blocking(move || {
            let raw: Option<String> = this.with_connection(|conn| {
                redis::cmd("BRPOPLPUSH")
                    .arg(&this.pending_key)
                    .arg(&this.processing_key)
                    .arg(timeout_secs)
                    .query(conn)
                    .map_err(command_error)
            })?;
            let Some(raw) = raw else {
                return Ok(None);
            };

            match serde_json::from_str::<WorkItem>(&raw) {
                Ok(item) => Ok(Some(Delivery {
                    item,
                    receipt: Some(raw),
                })),
                Err(e) => {
                    warn!(queue = %this.processing_key, error = %e, "dropping malformed work item");
                    this.with_connection(|conn| this.remove_inflight(conn, &raw))?;
                    Err(QueueError::Serialization(e.to_string()))
                }
            }
        })
        .await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let Some(raw) = delivery.receipt.clone() else {
            return Ok(());
        };
        let this = self.clone();
        blocking(move || this.with_connection(|conn| this.remove_inflight(conn, &raw)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasksvc_core::JobId;

    fn item() -> WorkItem {
        WorkItem {
            job_id: JobId::new(),
            job_type: "hash".into(),
            payload: serde_json::json!({"data": "abc"}).as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn keys_are_derived_from_queue_name_and_consumer() {
        let queue = RedisWorkQueue::new("redis://127.0.0.1:6379", "tasksvc", Some("worker-a")).unwrap();
        assert_eq!(queue.consumer(), "worker-a");
        assert_eq!(queue.pending_key(), "tasksvc:pending");
        assert_eq!(queue.processing_key(), "tasksvc:processing:worker-a");
        assert_eq!(queue.idle_connections(), 0);
    }

    #[test]
    fn unnamed_consumers_get_distinct_processing_lists() {
        let a = RedisWorkQueue::new("redis://127.0.0.1:6379", "tasksvc", None).unwrap();
        let b = RedisWorkQueue::new("redis://127.0.0.1:6379", "tasksvc", None).unwrap();
        assert_eq!(a.pending_key(), b.pending_key());
        assert_ne!(a.processing_key(), b.processing_key());
    }

    #[test]
    fn invalid_url_is_a_connection_error() {
        let err = RedisWorkQueue::new("not a url", "tasksvc", None).unwrap_err();
        assert!(matches!(err, QueueError::Connection(_)));
    }

    /// Runs only when `REDIS_URL` points at a disposable Redis.
    #[tokio::test]
    async fn enqueue_dequeue_ack_round_trip() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            return;
        };
        let name = format!("tasksvc-test-{}", JobId::new());
        let queue = RedisWorkQueue::new(&url, &name, Some("worker-a")).unwrap();

        let item = item();
        queue.enqueue(item.clone()).await.unwrap();

        let delivery = queue.dequeue(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(delivery.item, item);

        // Unacked items survive a crash of the same consumer.
        let restarted = RedisWorkQueue::new(&url, &name, Some("worker-a")).unwrap();
        assert_eq!(restarted.recover_inflight().await.unwrap(), 1);
        let delivery = restarted.dequeue(Duration::from_secs(1)).await.unwrap().unwrap();
        restarted.ack(&delivery).await.unwrap();
        assert_eq!(restarted.recover_inflight().await.unwrap(), 0);

        // Sequential calls reuse one connection.
        assert_eq!(restarted.idle_connections(), 1);
        assert_eq!(queue.idle_connections(), 1);
    }

    /// Runs only when `REDIS_URL` points at a disposable Redis.
    #[tokio::test]
    async fn starting_a_consumer_leaves_other_inflight_items_alone() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            return;
        };
        let name = format!("tasksvc-test-{}", JobId::new());
        let running = RedisWorkQueue::new(&url, &name, Some("worker-a")).unwrap();
        running.enqueue(item()).await.unwrap();
        let held = running.dequeue(Duration::from_secs(1)).await.unwrap().unwrap();

        let newcomer = RedisWorkQueue::new(&url, &name, Some("worker-b")).unwrap();
        assert_eq!(newcomer.recover_inflight().await.unwrap(), 0);
        assert!(newcomer.dequeue(Duration::from_secs(1)).await.unwrap().is_none());

        running.ack(&held).await.unwrap();
        assert_eq!(running.recover_inflight().await.unwrap(), 0);
    }
}
