//! Job engine: submission and the worker-side processing state machine.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use tasksvc_core::{Document, DomainError, JobId};
use tasksvc_jobs::{
    HandlerRegistry, JitterSource, Job, JobHandler, JobStatus, RetryExecutor, RetryPolicy,
    UniformJitter,
};
use tasksvc_observability::ServiceMetrics;

use super::queue::{QueueError, WorkItem, WorkQueue};
use super::store::{JobStore, JobStoreError};

/// Engine over type-erased adapters, as wired by the service binary.
pub type DynJobEngine = JobEngine<Arc<dyn JobStore>, Arc<dyn WorkQueue>>;

/// Engine error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// A submission request.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitJob {
    pub job_type: String,
    pub payload: Document,
    pub idempotency_key: Option<String>,
}

impl SubmitJob {
    pub fn new(job_type: impl Into<String>, payload: Document) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Result of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// A new record was persisted and enqueued.
    Created(JobId),
    /// The idempotency key was already used; nothing was enqueued.
    Existing(JobId),
}

impl Submission {
    pub fn job_id(&self) -> JobId {
        match self {
            Submission::Created(id) | Submission::Existing(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Submission::Created(_))
    }
}

/// What a processing pass did with a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// No record exists for the item's job id.
    Missing,
    /// The record was already terminal; the redelivery was ignored.
    AlreadyTerminal(JobStatus),
    /// The pass ran and left the record in this terminal status.
    Finished(JobStatus),
}

/// Drives jobs from submission to a terminal state.
pub struct JobEngine<S, Q> {
    registry: HandlerRegistry,
    store: S,
    queue: Q,
    policy: RetryPolicy,
    jitter: Arc<dyn JitterSource>,
    metrics: Option<ServiceMetrics>,
}

impl<S, Q> JobEngine<S, Q>
where
    S: JobStore,
    Q: WorkQueue,
{
    pub fn new(registry: HandlerRegistry, store: S, queue: Q, policy: RetryPolicy) -> Self {
        Self {
            registry,
            store,
            queue,
            policy,
            jitter: Arc::new(UniformJitter),
            metrics: None,
        }
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_metrics(mut self, metrics: ServiceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Validate, deduplicate, persist and enqueue a job.
    ///
    /// An empty idempotency key counts as no key.
    ///
    /// If enqueueing fails after the record is created, the record stays
    /// `QUEUED` and keeps its idempotency key: a retry with the same key gets
    /// that job id back and nothing is enqueued again. Such records have to be
    /// requeued out of band.
    #[instrument(skip(self, request), fields(job_type = %request.job_type))]
    pub async fn submit(&self, request: SubmitJob) -> Result<Submission, EngineError> {
        let SubmitJob {
            job_type,
            payload,
            idempotency_key,
        } = request;

        let handler = self.registry.resolve(&job_type)?;
        handler.validate(&payload)?;

        let idempotency_key = idempotency_key.filter(|key| !key.is_empty());
        if let Some(key) = idempotency_key.as_deref() {
            if let Some(existing) = self.store.get_by_idempotency_key(key).await? {
                debug!(job_id = %existing.id, "idempotency key already used");
                return Ok(Submission::Existing(existing.id));
            }
        }

        let job = Job::new(job_type, payload, idempotency_key);
        match self.store.create(&job).await {
            Ok(()) => {}
            Err(JobStoreError::DuplicateIdempotencyKey(_)) => {
                // Lost a race with a concurrent submission using the same key.
                let key = job.idempotency_key.as_deref().unwrap_or_default();
                let winner = self
                    .store
                    .get_by_idempotency_key(key)
                    .await?
                    .ok_or_else(|| {
                        JobStoreError::Storage(format!("idempotency key {key} vanished"))
                    })?;
                debug!(job_id = %winner.id, "idempotency key claimed concurrently");
                return Ok(Submission::Existing(winner.id));
            }
            Err(e) => return Err(e.into()),
        }

        let item = WorkItem {
            job_id: job.id,
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
        };
        if let Err(e) = self.queue.enqueue(item).await {
            error!(job_id = %job.id, error = %e, "failed to enqueue job");
            return Err(e.into());
        }

        info!(job_id = %job.id, "job submitted");
        Ok(Submission::Created(job.id))
    }

    /// Run one processing pass for a dequeued work item.
    ///
    /// Redeliveries of terminal jobs and items for unknown jobs are no-ops.
    /// Every state change is persisted before the next step runs.
    #[instrument(skip(self, item), fields(job_id = %item.job_id, job_type = %item.job_type))]
    pub async fn process_job(&self, item: &WorkItem) -> Result<ProcessOutcome, EngineError> {
        let Some(mut job) = self.store.get(item.job_id).await? else {
            debug!("work item refers to an unknown job, skipping");
            return Ok(ProcessOutcome::Missing);
        };
        if job.is_terminal() {
            info!(status = %job.status, "job already finished, ignoring redelivery");
            return Ok(ProcessOutcome::AlreadyTerminal(job.status));
        }

        job.mark_running(Utc::now())?;
        self.store.update(&job).await?;
        debug!("job running");

        let Some(handler) = self.registry.get(&item.job_type).cloned() else {
            let message = DomainError::unsupported_job_type(item.job_type.as_str()).to_string();
            error!(error = %message, "no handler for queued job");
            job.record_failure(message)?;
            job.mark_compensation_failed(
                format!("no compensation registered for job type {}", item.job_type),
                Utc::now(),
            )?;
            self.store.update(&job).await?;
            self.record_processed(job.status);
            return Ok(ProcessOutcome::Finished(job.status));
        };

        let executor = self.executor_for(job.id, &item.job_type);
        let outcome = executor
            .run(|payload| handler.execute(payload), &item.payload)
            .await;

        match outcome {
            Ok(result) => {
                job.mark_succeeded(result, Utc::now())?;
                self.store.update(&job).await?;
                info!(attempts = job.attempts, "job succeeded");
            }
            Err(failure) => {
                warn!(error = %failure, kind = ?failure.kind, "job execution abandoned, compensating");
                job.record_failure(failure.message)?;
                self.store.update(&job).await?;
                self.compensate(&mut job, handler.as_ref(), &item.payload)?;
                self.store.update(&job).await?;
            }
        }

        self.record_processed(job.status);
        Ok(ProcessOutcome::Finished(job.status))
    }

    /// Fetch one job record.
    pub async fn get(&self, id: JobId) -> Result<Job, EngineError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found().into())
    }

    /// All job records, most recent first.
    pub async fn list(&self) -> Result<Vec<Job>, EngineError> {
        Ok(self.store.list_recent(None).await?)
    }

    fn compensate(
        &self,
        job: &mut Job,
        handler: &dyn JobHandler,
        payload: &Document,
    ) -> Result<(), EngineError> {
        let state = handler.compensation_state(payload);
        match handler.compensate(&state) {
            Ok(result) => {
                job.mark_compensated(result, Utc::now())?;
                info!(attempts = job.attempts, "job compensated");
            }
            Err(failure) => {
                error!(error = %failure, "compensation failed, job needs attention");
                job.mark_compensation_failed(failure.message, Utc::now())?;
            }
        }
        Ok(())
    }

    fn executor_for(&self, job_id: JobId, job_type: &str) -> RetryExecutor {
        let metrics = self.metrics.clone();
        let job_type = job_type.to_string();
        RetryExecutor::new(self.policy.clone())
            .with_jitter(self.jitter.clone())
            .with_observer(move |attempt, failure, delay| {
                warn!(
                    job_id = %job_id,
                    job_type = %job_type,
                    attempt,
                    error = %failure,
                    delay_ms = delay.as_millis() as u64,
                    "job attempt failed, retrying"
                );
                if let Some(metrics) = &metrics {
                    metrics.record_retry(&job_type);
                }
            })
    }

    fn record_processed(&self, status: JobStatus) {
        if let Some(metrics) = &self.metrics {
            metrics.record_job_processed(status.as_str());
        }
    }
}
