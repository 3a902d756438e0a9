//! Job record and lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tasksvc_core::{Document, DomainError, DomainResult, JobId};

/// Job lifecycle status.
///
/// `Queued -> Running -> {Succeeded, Failed, Compensated}`. The last three are
/// terminal; nothing leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Persisted and enqueued, waiting for a worker
    Queued,
    /// A worker is executing a processing pass
    Running,
    /// Execute succeeded
    Succeeded,
    /// Execute was abandoned and compensation also failed
    Failed,
    /// Execute was abandoned and compensation succeeded
    Compensated,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::Compensated,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Compensated => "COMPENSATED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Compensated
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `Running -> Running` is allowed so that a work item redelivered after a
    /// crash mid-pass can be picked up again.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Running, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Compensated)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown job status: {s}")))
    }
}

/// A submitted unit of work and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID (immutable)
    pub id: JobId,
    /// Handler registry tag
    pub job_type: String,
    /// Opaque payload, interpreted only by the handler
    pub payload: Document,
    /// Caller-supplied deduplication token
    pub idempotency_key: Option<String>,
    pub status: JobStatus,
    /// Number of processing passes (not internal retries)
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Most recent execution failure; cleared on success
    pub last_error: Option<String>,
    /// Set only when compensation itself failed
    pub compensation_error: Option<String>,
    /// Output of execute (success) or compensate (compensated failure)
    pub result: Option<Document>,
}

impl Job {
    /// Create a new job in `Queued`.
    pub fn new(job_type: impl Into<String>, payload: Document, idempotency_key: Option<String>) -> Self {
        Self::new_at(JobId::new(), job_type, payload, idempotency_key, Utc::now())
    }

    /// Create a job with an explicit id and creation time.
    pub fn new_at(
        id: JobId,
        job_type: impl Into<String>,
        payload: Document,
        idempotency_key: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            job_type: job_type.into(),
            payload,
            idempotency_key,
            status: JobStatus::Queued,
            attempts: 0,
            started_at: None,
            completed_at: None,
            created_at,
            last_error: None,
            compensation_error: None,
            result: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: JobStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_transition(self.status, next));
        }
        self.status = next;
        Ok(())
    }

    /// Start a processing pass. `started_at` is only set the first time.
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(JobStatus::Running)?;
        self.started_at.get_or_insert(now);
        Ok(())
    }

    /// Finish the pass successfully.
    pub fn mark_succeeded(&mut self, result: Document, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(JobStatus::Succeeded)?;
        self.attempts += 1;
        self.last_error = None;
        self.result = Some(result);
        self.completed_at.get_or_insert(now);
        Ok(())
    }

    /// Record that execute was abandoned for this pass.
    ///
    /// The status stays `Running`; compensation decides the terminal state.
    pub fn record_failure(&mut self, message: impl Into<String>) -> DomainResult<()> {
        if self.status != JobStatus::Running {
            return Err(DomainError::invalid_transition(self.status, JobStatus::Running));
        }
        self.attempts += 1;
        self.last_error = Some(message.into());
        Ok(())
    }

    /// Compensation succeeded after an abandoned execute.
    pub fn mark_compensated(&mut self, result: Document, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(JobStatus::Compensated)?;
        self.result = Some(result);
        self.completed_at.get_or_insert(now);
        Ok(())
    }

    /// Compensation failed too; operator attention required.
    pub fn mark_compensation_failed(
        &mut self,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.transition(JobStatus::Failed)?;
        self.compensation_error = Some(message.into());
        self.completed_at.get_or_insert(now);
        Ok(())
    }
}
