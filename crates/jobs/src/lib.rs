//! Job domain module.
//!
//! This crate holds the job record and its state machine, the retry executor,
//! and the handler registry with the built-in job types. It performs no IO;
//! the only suspension point is the backoff sleep inside [`RetryExecutor`].

pub mod failure;
pub mod handlers;
pub mod registry;
pub mod retry;
pub mod types;

pub use failure::{FailureKind, HandlerFailure};
pub use registry::{HandlerRegistry, HandlerRegistryBuilder, JobHandler, RegistryError};
pub use retry::{
    JitterSource, PolicyError, RetryExecutor, RetryObserver, RetryOn, RetryPolicy, UniformJitter,
};
pub use types::{Job, JobStatus};
