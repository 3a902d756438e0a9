//! Job type registry: maps a type tag to its execute/compensate pair.
//!
//! The registry is built once at startup and is immutable afterwards, so it
//! can be shared between request handlers and workers without locking.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use tasksvc_core::{Document, DomainError, DomainResult, empty_document};

use crate::failure::HandlerFailure;
use crate::handlers::{BLOCK_IP, BlockIpHandler, HASH, HashHandler};

/// Capabilities bound to one job type.
pub trait JobHandler: Send + Sync {
    /// Upfront payload check run at submission, before any record exists.
    fn validate(&self, _payload: &Document) -> DomainResult<()> {
        Ok(())
    }

    /// The primary action. Runs under the retry executor.
    fn execute(&self, payload: &Document) -> Result<Document, HandlerFailure>;

    /// State handed to `compensate`, derived from the original payload.
    fn compensation_state(&self, _payload: &Document) -> Document {
        empty_document()
    }

    /// Undo partial effects of `execute`. Called at most once, never retried.
    fn compensate(&self, state: &Document) -> Result<Document, HandlerFailure>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("job type tag must not be empty")]
    EmptyTag,
    #[error("job type '{0}' already registered")]
    Duplicate(String),
}

/// Immutable mapping from job type tag to handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<HashMap<String, Arc<dyn JobHandler>>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Registry with the built-in `hash` and `block_ip` types.
    pub fn with_builtin_handlers() -> Self {
        Self::builder().with_builtin_handlers().build()
    }

    pub fn get(&self, job_type: &str) -> Option<&Arc<dyn JobHandler>> {
        self.handlers.get(job_type)
    }

    /// Look up a handler, classifying a bad tag the way submission reports it.
    pub fn resolve(&self, job_type: &str) -> DomainResult<&Arc<dyn JobHandler>> {
        if job_type.trim().is_empty() {
            return Err(DomainError::validation("Missing job type"));
        }
        self.get(job_type)
            .ok_or_else(|| DomainError::unsupported_job_type(job_type))
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered tags, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

/// Collects handlers before freezing them into a [`HandlerRegistry`].
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistryBuilder {
    pub fn register<H>(mut self, job_type: impl Into<String>, handler: H) -> Result<Self, RegistryError>
    where
        H: JobHandler + 'static,
    {
        let job_type = job_type.into();
        if job_type.trim().is_empty() {
            return Err(RegistryError::EmptyTag);
        }
        if self.handlers.contains_key(&job_type) {
            return Err(RegistryError::Duplicate(job_type));
        }
        self.handlers.insert(job_type, Arc::new(handler));
        Ok(self)
    }

    pub fn with_builtin_handlers(mut self) -> Self {
        self.handlers.insert(HASH.to_string(), Arc::new(HashHandler));
        self.handlers.insert(BLOCK_IP.to_string(), Arc::new(BlockIpHandler));
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: Arc::new(self.handlers),
        }
    }
}
