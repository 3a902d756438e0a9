//! Bounded retry with jittered exponential backoff.
//!
//! ```text
//! attempt   nominal delay (base=0.5s, x2)   window (jitter 0.4)
//! ───────────────────────────────────────────────────────────
//!    1             0.5s                      0.3s - 0.7s
//!    2             1.0s                      0.6s - 1.4s
//!    3             2.0s                      1.2s - 2.8s
//!   ...
//! max_attempts     -                         failure propagated
//! ```
//!
//! The executor knows nothing about jobs: it calls a fallible function, sleeps
//! between attempts and hands back the last failure untouched.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::failure::{FailureKind, HandlerFailure};

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_JITTER_RATIO: f64 = 0.5;

/// Which failure kinds are worth another attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryOn {
    /// Every failure is retried
    Any,
    /// Only the listed kinds are retried
    Kinds(HashSet<FailureKind>),
}

impl RetryOn {
    pub fn kinds(kinds: impl IntoIterator<Item = FailureKind>) -> Self {
        Self::Kinds(kinds.into_iter().collect())
    }

    pub fn matches(&self, kind: FailureKind) -> bool {
        match self {
            RetryOn::Any => true,
            RetryOn::Kinds(kinds) => kinds.contains(&kind),
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total calls allowed, including the first (>= 1)
    pub max_attempts: u32,
    /// Nominal delay before the first retry (> 0)
    pub base_delay: Duration,
    /// Growth factor per attempt (>= 1)
    pub backoff_multiplier: f64,
    /// Half-width of the jitter band as a fraction of the nominal delay
    pub jitter_ratio: f64,
    pub retry_on: RetryOn,
}

/// Rejected policy parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("max_attempts must be at least 1")]
    MaxAttempts,
    #[error("base_delay must be greater than zero")]
    BaseDelay,
    #[error("backoff_multiplier must be a finite number >= 1, got {0}")]
    BackoffMultiplier(f64),
    #[error("jitter_ratio must be a finite number >= 0, got {0}")]
    JitterRatio(f64),
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter_ratio: DEFAULT_JITTER_RATIO,
            retry_on: RetryOn::Any,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        backoff_multiplier: f64,
        jitter_ratio: f64,
    ) -> Result<Self, PolicyError> {
        let policy = Self {
            max_attempts,
            base_delay,
            backoff_multiplier,
            jitter_ratio,
            retry_on: RetryOn::Any,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// A policy that makes exactly one call.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_attempts < 1 {
            return Err(PolicyError::MaxAttempts);
        }
        if self.base_delay.is_zero() {
            return Err(PolicyError::BaseDelay);
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(PolicyError::BackoffMultiplier(self.backoff_multiplier));
        }
        if !self.jitter_ratio.is_finite() || self.jitter_ratio < 0.0 {
            return Err(PolicyError::JitterRatio(self.jitter_ratio));
        }
        Ok(())
    }

    /// Nominal delay in seconds after failed attempt `attempt` (1-indexed).
    pub fn nominal_delay(&self, attempt: u32) -> f64 {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exp)
    }

    /// Bounds, in seconds, from which the actual delay is drawn.
    ///
    /// The low bound is clamped at zero for jitter ratios of 1 or more.
    pub fn jitter_window(&self, attempt: u32) -> (f64, f64) {
        let nominal = self.nominal_delay(attempt);
        let low = (nominal * (1.0 - self.jitter_ratio)).max(0.0);
        let high = nominal * (1.0 + self.jitter_ratio);
        (low, high)
    }

    /// Whether a failure on attempt `attempt` earns another call.
    pub fn should_retry(&self, attempt: u32, failure: &HandlerFailure) -> bool {
        attempt < self.max_attempts && self.retry_on.matches(failure.kind)
    }
}

/// Draws the actual delay from a jitter window.
pub trait JitterSource: Send + Sync {
    fn sample(&self, low: f64, high: f64) -> f64;
}

/// Uniform draw over `[low, high]` from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformJitter;

impl JitterSource for UniformJitter {
    fn sample(&self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        rand::thread_rng().gen_range(low..=high)
    }
}

/// Called once per retry with `(attempt, failure, planned_delay)`.
pub type RetryObserver = Arc<dyn Fn(u32, &HandlerFailure, Duration) + Send + Sync>;

/// Runs a fallible function under a [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    jitter: Arc<dyn JitterSource>,
    observer: Option<RetryObserver>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            jitter: Arc::new(UniformJitter),
            observer: None,
        }
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(u32, &HandlerFailure, Duration) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Call `handler(input)` until it succeeds, fails with a non-retryable
    /// kind, or `max_attempts` calls have been made.
    pub async fn run<I, T, F>(&self, mut handler: F, input: &I) -> Result<T, HandlerFailure>
    where
        I: ?Sized,
        F: FnMut(&I) -> Result<T, HandlerFailure>,
    {
        let mut attempt: u32 = 1;
        loop {
            let failure = match handler(input) {
                Ok(output) => return Ok(output),
                Err(failure) => failure,
            };

            if !self.policy.should_retry(attempt, &failure) {
                return Err(failure);
            }

            let (low, high) = self.policy.jitter_window(attempt);
            let delay_secs = self.jitter.sample(low, high).max(0.0);
            let delay = Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX);

            if let Some(observer) = &self.observer {
                observer(attempt, &failure, delay);
            }

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
