//! Retry Policy Engine
//!
//! Generic retry-with-backoff executor used by every fallible operation that
//! is worth repeating.
//!
//! # Behavior
//!
//! - The operation runs up to `max_attempts` times.
//! - A failure the predicate rejects is returned immediately as
//!   [`RetryError::Aborted`] without further attempts.
//! - Between attempts the engine waits `base * multiplier^n`, capped at
//!   `max_delay`, optionally plus up to 25% jitter.
//! - When the budget is spent the last failure is returned as
//!   [`RetryError::Exhausted`].
//! - Every execution, successful or not, is appended to a capped history.

use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::ClassifiedError;
use crate::health::ServiceError;
use crate::pairing::DecodeError;
use crate::transport::{map_connect_io_error, TransportError};

/// Default number of retry records kept
pub const DEFAULT_RETRY_HISTORY: usize = 100;

// ============================================================================
// Configuration
// ============================================================================

/// Retry settings as written in the config file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Upper bound on a single delay
    pub max_delay_ms: u64,
    /// Add up to 25% random jitter
    pub jitter: bool,
    /// Retry records kept for inspection
    pub history_capacity: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            jitter: false,
            history_capacity: DEFAULT_RETRY_HISTORY,
        }
    }
}

impl RetryConfig {
    /// Policy described by this config
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Backoff {
                base: Duration::from_millis(self.base_delay_ms),
                multiplier: self.multiplier,
                max_delay: Duration::from_millis(self.max_delay_ms),
                jitter: self.jitter,
            },
        }
    }
}

/// Exponential backoff schedule
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry
    pub base: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Upper bound on a single delay
    pub max_delay: Duration,
    /// Add up to 25% random jitter
    pub jitter: bool,
}

impl Backoff {
    /// Delay after the failed attempt with 0-based index `attempt`
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
        let base = self.base.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let millis = if self.jitter {
            // Add up to 25% jitter
            let jitter = rand::random::<f64>() * 0.25;
            capped * (1.0 + jitter)
        } else {
            capped
        };

        Duration::from_millis(millis as u64)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        RetryConfig::default().policy().backoff
    }
}

/// How many times to try and how long to wait in between
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first; 0 behaves like 1
    pub max_attempts: u32,
    /// Delay schedule
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Policy with the given attempts and the default schedule
    #[must_use]
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::default(),
        }
    }

    /// Single attempt, no retries
    #[must_use]
    pub fn once() -> Self {
        Self::with_attempts(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().policy()
    }
}

// ============================================================================
// Errors & Predicates
// ============================================================================

/// Failure of a retried operation
#[derive(Debug)]
pub enum RetryError<E> {
    /// The predicate rejected the failure; no further attempts were made
    Aborted {
        /// Attempts made
        attempts: u32,
        /// The failure
        source: E,
    },
    /// Every attempt failed
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// The last failure
        source: E,
    },
}

impl<E> RetryError<E> {
    /// Attempts made before giving up
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Aborted { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// The underlying failure
    #[must_use]
    pub fn inner(&self) -> &E {
        match self {
            Self::Aborted { source, .. } | Self::Exhausted { source, .. } => source,
        }
    }

    /// Take the underlying failure
    pub fn into_inner(self) -> E {
        match self {
            Self::Aborted { source, .. } | Self::Exhausted { source, .. } => source,
        }
    }

    /// Whether the retry budget was consumed
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aborted { source, .. } => write!(f, "{source}"),
            Self::Exhausted { attempts, source } => {
                write!(f, "Retries exhausted after {attempts} attempts: {source}")
            }
        }
    }
}

impl<E: Error + 'static> Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.inner())
    }
}

/// Failures that know whether repeating the operation may help
pub trait Retryable {
    /// Whether a later attempt may succeed
    fn is_retryable(&self) -> bool;
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

impl Retryable for ServiceError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

impl Retryable for DecodeError {
    fn is_retryable(&self) -> bool {
        false
    }
}

impl Retryable for ClassifiedError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl Retryable for anyhow::Error {
    fn is_retryable(&self) -> bool {
        is_transient(&**self)
    }
}

/// Default retry predicate over an arbitrary error chain
///
/// Network-category transient failures (timeouts, lost or refused
/// connections) are retryable; authorization, not-found and malformed-data
/// failures are not. Unknown errors are not retried.
#[must_use]
pub fn is_transient(err: &(dyn Error + 'static)) -> bool {
    for cause in std::iter::successors(Some(err), |&e| e.source()) {
        if let Some(e) = cause.downcast_ref::<TransportError>() {
            return e.is_transient();
        }
        if let Some(e) = cause.downcast_ref::<ServiceError>() {
            return e.is_transient();
        }
        if let Some(e) = cause.downcast_ref::<ClassifiedError>() {
            return e.retryable;
        }
        if cause.downcast_ref::<DecodeError>().is_some() {
            return false;
        }
        if cause.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return true;
        }
        if let Some(e) = cause.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind;
            return matches!(
                map_connect_io_error(e),
                TransportError::NetworkUnavailable(_) | TransportError::ConnectionLost
            ) || matches!(
                e.kind(),
                ErrorKind::ConnectionRefused | ErrorKind::TimedOut | ErrorKind::Interrupted
            );
        }
    }
    false
}

// ============================================================================
// Engine
// ============================================================================

/// One finished retried execution
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RetryRecord {
    /// Operation name
    pub operation: String,
    /// Attempts made
    pub attempts: u32,
    /// Whether the operation eventually succeeded
    pub succeeded: bool,
    /// Final failure, if any
    pub error: Option<String>,
    /// Wall time including backoff waits
    pub elapsed: Duration,
    /// When the execution finished
    pub finished_at: DateTime<Utc>,
}

/// Executes operations under a [`RetryPolicy`] and keeps a history
pub struct RetryEngine {
    default_policy: RetryPolicy,
    history: Mutex<VecDeque<RetryRecord>>,
    capacity: usize,
}

impl RetryEngine {
    /// Create an engine
    #[must_use]
    pub fn new(default_policy: RetryPolicy, history_capacity: usize) -> Self {
        Self {
            default_policy,
            history: Mutex::new(VecDeque::new()),
            capacity: history_capacity.max(1),
        }
    }

    /// Create an engine from config
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.policy(), config.history_capacity)
    }

    /// Policy used when callers have none of their own
    #[must_use]
    pub fn default_policy(&self) -> RetryPolicy {
        self.default_policy
    }

    /// Run `operation` until it succeeds, the predicate rejects a failure, or
    /// the attempt budget is spent
    ///
    /// `operation` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// - [`RetryError::Aborted`] with the first failure `should_retry` rejects
    /// - [`RetryError::Exhausted`] with the last failure after `max_attempts`
    pub async fn execute<T, E, F, Fut, P>(
        &self,
        name: &str,
        policy: &RetryPolicy,
        should_retry: P,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let started = tokio::time::Instant::now();
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation = name, attempt, "Succeeded after retry");
                    }
                    self.record(name, attempt, None, started);
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !should_retry(&error) {
                tracing::debug!(operation = name, attempt, error = %error, "Failure is not retryable");
                self.record(name, attempt, Some(error.to_string()), started);
                return Err(RetryError::Aborted {
                    attempts: attempt,
                    source: error,
                });
            }

            if attempt >= max_attempts {
                tracing::warn!(operation = name, attempts = attempt, error = %error, "Retries exhausted");
                self.record(name, attempt, Some(error.to_string()), started);
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = policy.backoff.delay_for(attempt - 1);
            tracing::debug!(
                operation = name,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Retrying after backoff"
            );
            // Backoff before retry
            tokio::time::sleep(delay).await;
        }
    }

    /// [`execute`](Self::execute) with the default transient-failure predicate
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn execute_default<T, E, F, Fut>(
        &self,
        name: &str,
        policy: &RetryPolicy,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        self.execute(name, policy, Retryable::is_retryable, operation)
            .await
    }

    /// History snapshot, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<RetryRecord> {
        self.history.lock().iter().cloned().collect()
    }

    /// Forget all records
    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    fn record(&self, name: &str, attempts: u32, error: Option<String>, started: tokio::time::Instant) {
        let record = RetryRecord {
            operation: name.to_string(),
            attempts,
            succeeded: error.is_none(),
            error,
            elapsed: started.elapsed(),
            finished_at: Utc::now(),
        };

        let mut history = self.history.lock();
        history.push_back(record);
        while history.len() > self.capacity {
            history.pop_front();
        }
    }
}

impl Default for RetryEngine {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), DEFAULT_RETRY_HISTORY)
    }
}
