//! Work queue: at-least-once delivery of work items to workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};

use tasksvc_core::{Document, JobId};

/// Unit of queued work, as carried on the wire.
///
/// Carries a copy of the payload so a worker can run without re-reading it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub job_id: JobId,
    pub job_type: String,
    pub payload: Document,
}

/// A dequeued item plus whatever the broker needs to acknowledge it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub item: WorkItem,
    /// Broker-specific acknowledgement token (the raw message for Redis).
    pub receipt: Option<String>,
}

impl Delivery {
    pub fn unreceipted(item: WorkItem) -> Self {
        Self {
            item,
            receipt: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue closed")]
    Closed,
    #[error("queue connection error: {0}")]
    Connection(String),
    #[error("queue command error: {0}")]
    Command(String),
    #[error("work item serialization error: {0}")]
    Serialization(String),
}

/// Queue abstraction.
///
/// Delivery is at-least-once: an item dequeued but never acked may be
/// delivered again.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError>;

    /// Wait up to `wait` for the next item. `Ok(None)` means nothing arrived.
    async fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Acknowledge a processed delivery.
    async fn ack(&self, _delivery: &Delivery) -> Result<(), QueueError> {
        Ok(())
    }
}

#[async_trait]
impl<T> WorkQueue for Arc<T>
where
    T: WorkQueue + ?Sized,
{
    async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        (**self).enqueue(item).await
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        (**self).dequeue(wait).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        (**self).ack(delivery).await
    }
}

/// In-process queue over an unbounded channel.
///
/// Items are lost on restart and acks are no-ops.
#[derive(Debug)]
pub struct InMemoryWorkQueue {
    tx: mpsc::UnboundedSender<WorkItem>,
    rx: Mutex<mpsc::UnboundedReceiver<WorkItem>>,
    enqueued: AtomicU64,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            enqueued: AtomicU64::new(0),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Total number of items ever enqueued.
    pub fn enqueued_total(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        self.tx.send(item).map_err(|_| QueueError::Closed)?;
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(wait, rx.recv()).await {
            Ok(Some(item)) => Ok(Some(Delivery::unreceipted(item))),
            Ok(None) => Err(QueueError::Closed),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(job_type: &str) -> WorkItem {
        WorkItem {
            job_id: JobId::new(),
            job_type: job_type.into(),
            payload: json!({"data": "abc"}).as_object().cloned().unwrap(),
        }
    }

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let queue = InMemoryWorkQueue::new();
        let a = item("hash");
        let b = item("block_ip");
        queue.enqueue(a.clone()).await.unwrap();
        queue.enqueue(b.clone()).await.unwrap();

        let first = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        let second = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(first.item, a);
        assert_eq!(second.item, b);
        assert!(first.receipt.is_none());
        assert_eq!(queue.enqueued_total(), 2);

        queue.ack(&first).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_times_out_when_empty() {
        let queue = InMemoryWorkQueue::new();
        let got = queue.dequeue(Duration::from_secs(5)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn waiting_consumer_receives_later_item() {
        let queue = InMemoryWorkQueue::arc();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };
        let sent = item("hash");
        queue.enqueue(sent.clone()).await.unwrap();

        let delivered = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(delivered.item, sent);
    }

    #[test]
    fn work_item_wire_format_is_camel_case() {
        let it = item("hash");
        let value = serde_json::to_value(&it).unwrap();
        assert_eq!(value["jobType"], "hash");
        assert_eq!(value["jobId"], it.job_id.to_string());
        assert_eq!(value["payload"]["data"], "abc");

        let back: WorkItem = serde_json::from_value(value).unwrap();
        assert_eq!(back, it);
    }
}
