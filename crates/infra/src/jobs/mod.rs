//! Job lifecycle engine and its adapters.
//!
//! ## Design
//!
//! - Submission validates, deduplicates by idempotency key, persists a
//!   `QUEUED` record and enqueues a work item
//! - Workers dequeue items and drive each record to a terminal state
//! - Execute runs under bounded retry with jittered exponential backoff
//! - When retries are exhausted a single compensation attempt decides between
//!   `COMPENSATED` and `FAILED`
//!
//! ## Components
//!
//! - `JobStore`: persistence for job records (in-memory or Postgres)
//! - `WorkQueue`: at-least-once delivery of work items (in-memory or Redis)
//! - `JobEngine`: submission and the worker-side processing state machine
//! - `WorkerPool`: N independent dequeue loops per process

pub mod engine;
pub mod postgres;
pub mod queue;
#[cfg(feature = "redis")]
pub mod redis_queue;
pub mod store;
pub mod worker;

pub use engine::{DynJobEngine, EngineError, JobEngine, ProcessOutcome, SubmitJob, Submission};
pub use postgres::PostgresJobStore;
pub use queue::{Delivery, InMemoryWorkQueue, QueueError, WorkItem, WorkQueue};
#[cfg(feature = "redis")]
pub use redis_queue::RedisWorkQueue;
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use worker::{WorkerConfig, WorkerPool, WorkerPoolHandle, WorkerStats};
