//! Recovery Orchestrator
//!
//! Given a classified error, picks the recovery strategy registered for its
//! category and runs it through the [`RetryEngine`].
//!
//! | Category  | Built-in strategy                                  |
//! |-----------|----------------------------------------------------|
//! | `network` | [`ReconnectStrategy`]: reconnect the session       |
//! | `service` | [`HealthRecheckStrategy`]: probe the named service |
//! | others    | none, reported as `Unsupported`                    |
//!
//! Every call counts towards [`RecoveryMetrics`]. `Unsupported` counts as a
//! failure.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::errors::{ClassifiedError, ErrorCategory, GlobalErrorRegistry};
use crate::health::{HealthProbe, ServiceError, ServiceHealthRegistry, ServiceStatus};
use crate::retry::{RetryEngine, RetryPolicy};
use crate::transport::TransportSession;

/// Recovery records kept for inspection
const RECOVERY_HISTORY: usize = 100;

// ============================================================================
// Strategies
// ============================================================================

/// A way of recovering from one category of failure
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Short name for logs and records
    fn name(&self) -> &'static str;

    /// Make one recovery attempt
    ///
    /// Errors are checked with the default retry predicate to decide whether
    /// another attempt is worthwhile.
    async fn recover(&self, error: &ClassifiedError) -> anyhow::Result<()>;
}

/// Reconnects the session to its current profile
pub struct ReconnectStrategy {
    session: TransportSession,
}

impl ReconnectStrategy {
    /// Create a strategy for a session
    #[must_use]
    pub fn new(session: TransportSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl RecoveryStrategy for ReconnectStrategy {
    fn name(&self) -> &'static str {
        "reconnect"
    }

    async fn recover(&self, _error: &ClassifiedError) -> anyhow::Result<()> {
        self.session.reconnect().await?;
        Ok(())
    }
}

/// Re-checks the failed service and succeeds only if it is healthy again
pub struct HealthRecheckStrategy {
    registry: Arc<ServiceHealthRegistry>,
    probe: Arc<dyn HealthProbe>,
}

impl HealthRecheckStrategy {
    /// Create a strategy using `probe` to check services in `registry`
    #[must_use]
    pub fn new(registry: Arc<ServiceHealthRegistry>, probe: Arc<dyn HealthProbe>) -> Self {
        Self { registry, probe }
    }
}

#[async_trait]
impl RecoveryStrategy for HealthRecheckStrategy {
    fn name(&self) -> &'static str {
        "health-recheck"
    }

    async fn recover(&self, error: &ClassifiedError) -> anyhow::Result<()> {
        let Some(service) = error.service.as_deref() else {
            anyhow::bail!("error does not name a service to re-check");
        };

        let status = self.registry.run_check(service, self.probe.as_ref()).await?;
        if status == ServiceStatus::Healthy {
            Ok(())
        } else {
            Err(ServiceError::Unavailable {
                service: service.to_string(),
                reason: format!("status is {status}"),
            }
            .into())
        }
    }
}

// ============================================================================
// Outcomes & Metrics
// ============================================================================

/// Result of one recovery request
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// The strategy succeeded
    Recovered {
        /// Strategy name
        strategy: String,
        /// Attempts made
        attempts: u32,
    },
    /// The strategy gave up
    Failed {
        /// Strategy name
        strategy: String,
        /// Attempts made
        attempts: u32,
        /// Last failure
        reason: String,
    },
    /// No strategy is registered for the category
    Unsupported {
        /// Category of the error
        category: ErrorCategory,
    },
}

impl RecoveryOutcome {
    /// Whether recovery succeeded
    #[must_use]
    pub fn is_recovered(&self) -> bool {
        matches!(self, Self::Recovered { .. })
    }
}

/// Monotonic recovery counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryMetrics {
    /// Recovery requests
    pub total_attempts: u64,
    /// Requests that recovered
    pub successes: u64,
    /// Requests that did not
    pub failures: u64,
}

impl RecoveryMetrics {
    /// `successes / total_attempts`, 0.0 when nothing was attempted
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.total_attempts as f64
        }
    }
}

/// One finished recovery request
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecoveryRecord {
    /// Title of the error being recovered from
    pub error_title: String,
    /// Category of that error
    pub category: ErrorCategory,
    /// What happened
    pub outcome: RecoveryOutcome,
    /// When the request finished
    pub finished_at: DateTime<Utc>,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Selects and runs recovery strategies
pub struct RecoveryOrchestrator {
    retry: Arc<RetryEngine>,
    errors: Arc<GlobalErrorRegistry>,
    strategies: DashMap<ErrorCategory, Arc<dyn RecoveryStrategy>>,
    policy: RetryPolicy,
    ledger: Mutex<Ledger>,
}

/// Counters and history, updated together so a snapshot always adds up
#[derive(Default)]
struct Ledger {
    metrics: RecoveryMetrics,
    history: VecDeque<RecoveryRecord>,
}

impl RecoveryOrchestrator {
    /// Create an orchestrator with no strategies
    #[must_use]
    pub fn new(
        retry: Arc<RetryEngine>,
        errors: Arc<GlobalErrorRegistry>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            retry,
            errors,
            strategies: DashMap::new(),
            policy,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Use `strategy` for errors of `category`, replacing any previous one
    pub fn register_strategy(&self, category: ErrorCategory, strategy: Arc<dyn RecoveryStrategy>) {
        tracing::debug!(%category, strategy = strategy.name(), "Recovery strategy registered");
        self.strategies.insert(category, strategy);
    }

    /// Whether a strategy exists for `category`
    #[must_use]
    pub fn supports(&self, category: ErrorCategory) -> bool {
        self.strategies.contains_key(&category)
    }

    /// Try to recover from `error`
    ///
    /// The request is counted once it finishes, so `successes + failures`
    /// always equals `total_attempts`.
    pub async fn attempt_recovery(&self, error: &ClassifiedError) -> RecoveryOutcome {
        let strategy = self
            .strategies
            .get(&error.category)
            .map(|entry| Arc::clone(entry.value()));

        let outcome = match strategy {
            None => {
                tracing::debug!(category = %error.category, "No recovery strategy for category");
                RecoveryOutcome::Unsupported {
                    category: error.category,
                }
            }
            Some(strategy) => self.run(strategy.as_ref(), error).await,
        };

        if outcome.is_recovered() && error.category == ErrorCategory::Network {
            self.errors.disable_offline_mode();
            // A service or data error shown meanwhile stays visible
            self.errors
                .hide_if(|current| current.category == ErrorCategory::Network);
        }

        let mut ledger = self.ledger.lock();
        ledger.metrics.total_attempts += 1;
        if outcome.is_recovered() {
            ledger.metrics.successes += 1;
        } else {
            ledger.metrics.failures += 1;
        }
        ledger.history.push_back(RecoveryRecord {
            error_title: error.title.clone(),
            category: error.category,
            outcome: outcome.clone(),
            finished_at: Utc::now(),
        });
        while ledger.history.len() > RECOVERY_HISTORY {
            ledger.history.pop_front();
        }
        drop(ledger);

        outcome
    }

    async fn run(&self, strategy: &dyn RecoveryStrategy, error: &ClassifiedError) -> RecoveryOutcome {
        let name = strategy.name();
        tracing::info!(strategy = name, error = %error.title, "Attempting recovery");

        let mut attempts = 0;
        let result = self
            .retry
            .execute_default(&format!("recover:{name}"), &self.policy, |attempt| {
                attempts = attempt;
                strategy.recover(error)
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!(strategy = name, attempts, "Recovered");
                RecoveryOutcome::Recovered {
                    strategy: name.to_string(),
                    attempts,
                }
            }
            Err(e) => {
                tracing::warn!(strategy = name, attempts = e.attempts(), error = %e, "Recovery failed");
                RecoveryOutcome::Failed {
                    strategy: name.to_string(),
                    attempts: e.attempts(),
                    reason: format!("{:#}", e.inner()),
                }
            }
        }
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn get_metrics(&self) -> RecoveryMetrics {
        self.ledger.lock().metrics
    }

    /// Fraction of recovery requests that succeeded
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        self.get_metrics().success_rate()
    }

    /// Recovery records, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<RecoveryRecord> {
        self.ledger.lock().history.iter().cloned().collect()
    }

    /// Reset counters and history
    ///
    /// For test isolation and explicit operator resets only.
    pub fn clear_history(&self) {
        let mut ledger = self.ledger.lock();
        ledger.metrics = RecoveryMetrics::default();
        ledger.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorSeverity;
    use crate::health::{Criticality, ServiceConfig, ServiceHealthRecord};
    use crate::transport::TransportError;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with `error` until `succeed_on` attempts have been made
    struct FlakyStrategy {
        calls: AtomicU32,
        succeed_on: u32,
        error: fn() -> anyhow::Error,
    }

    impl FlakyStrategy {
        fn new(succeed_on: u32, error: fn() -> anyhow::Error) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                succeed_on,
                error,
            })
        }
    }

    #[async_trait]
    impl RecoveryStrategy for FlakyStrategy {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn recover(&self, _: &ClassifiedError) -> anyhow::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(())
            } else {
                Err((self.error)())
            }
        }
    }

    struct StatusProbe(ServiceStatus);

    #[async_trait]
    impl HealthProbe for StatusProbe {
        async fn check(&self, _: &ServiceHealthRecord) -> Result<ServiceStatus, ServiceError> {
            Ok(self.0)
        }

        fn name(&self) -> &'static str {
            "status"
        }
    }

    fn transient() -> anyhow::Error {
        TransportError::ConnectionLost.into()
    }

    fn fatal() -> anyhow::Error {
        TransportError::Unauthorized("401".into()).into()
    }

    fn orchestrator() -> (RecoveryOrchestrator, Arc<GlobalErrorRegistry>) {
        let errors = Arc::new(GlobalErrorRegistry::new());
        let orchestrator = RecoveryOrchestrator::new(
            Arc::new(RetryEngine::default()),
            errors.clone(),
            RetryPolicy::with_attempts(3),
        );
        (orchestrator, errors)
    }

    fn network_error() -> ClassifiedError {
        ClassifiedError::new("Connection Lost", "lost", ErrorSeverity::Critical, ErrorCategory::Network)
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_recovery_retries_then_succeeds() {
        let (orchestrator, errors) = orchestrator();
        let strategy = FlakyStrategy::new(2, transient);
        orchestrator.register_strategy(ErrorCategory::Network, strategy.clone());

        errors.show(network_error());
        assert!(errors.is_offline());

        let outcome = orchestrator.attempt_recovery(&network_error()).await;

        assert_eq!(
            outcome,
            RecoveryOutcome::Recovered {
                strategy: "flaky".into(),
                attempts: 2
            }
        );
        assert!(!errors.is_offline());
        assert!(errors.current().is_none());
        assert_eq!(orchestrator.get_metrics().successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_runs_once() {
        let (orchestrator, _) = orchestrator();
        let strategy = FlakyStrategy::new(u32::MAX, fatal);
        orchestrator.register_strategy(ErrorCategory::Network, strategy.clone());

        let outcome = orchestrator.attempt_recovery(&network_error()).await;

        assert!(matches!(outcome, RecoveryOutcome::Failed { attempts: 1, .. }));
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_recovery() {
        let (orchestrator, errors) = orchestrator();
        orchestrator.register_strategy(ErrorCategory::Network, FlakyStrategy::new(u32::MAX, transient));
        errors.enable_offline_mode();

        let outcome = orchestrator.attempt_recovery(&network_error()).await;

        assert!(matches!(outcome, RecoveryOutcome::Failed { attempts: 3, .. }));
        assert!(errors.is_offline());
        assert_eq!(orchestrator.get_metrics().failures, 1);
    }

    #[tokio::test]
    async fn test_unsupported_category_counts_as_failure() {
        let (orchestrator, _) = orchestrator();
        let error = ClassifiedError::new("Bad", "data", ErrorSeverity::Error, ErrorCategory::Data);

        let outcome = orchestrator.attempt_recovery(&error).await;

        assert_eq!(
            outcome,
            RecoveryOutcome::Unsupported {
                category: ErrorCategory::Data
            }
        );
        assert_eq!(
            orchestrator.get_metrics(),
            RecoveryMetrics {
                total_attempts: 1,
                successes: 0,
                failures: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_and_clear() {
        let (orchestrator, _) = orchestrator();
        assert_eq!(orchestrator.success_rate(), 0.0);

        orchestrator.register_strategy(ErrorCategory::Network, FlakyStrategy::new(1, transient));
        orchestrator.attempt_recovery(&network_error()).await;
        orchestrator
            .attempt_recovery(&ClassifiedError::new("x", "y", ErrorSeverity::Error, ErrorCategory::Ui))
            .await;

        assert_eq!(orchestrator.get_metrics().total_attempts, 2);
        assert!((orchestrator.success_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(orchestrator.history().len(), 2);

        orchestrator.clear_history();
        assert_eq!(orchestrator.get_metrics(), RecoveryMetrics::default());
        assert!(orchestrator.history().is_empty());
    }

    /// Shows a service error while the reconnect is in flight, then succeeds
    struct ServiceFailsMeanwhile(Arc<GlobalErrorRegistry>);

    #[async_trait]
    impl RecoveryStrategy for ServiceFailsMeanwhile {
        fn name(&self) -> &'static str {
            "meanwhile"
        }

        async fn recover(&self, _: &ClassifiedError) -> anyhow::Result<()> {
            self.0.show(ClassifiedError::new(
                "Speech Down",
                "503",
                ErrorSeverity::Error,
                ErrorCategory::Service,
            ));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_network_recovery_keeps_newer_service_error() {
        let (orchestrator, errors) = orchestrator();
        orchestrator.register_strategy(
            ErrorCategory::Network,
            Arc::new(ServiceFailsMeanwhile(errors.clone())),
        );
        errors.show(network_error());

        let outcome = orchestrator.attempt_recovery(&network_error()).await;

        assert!(outcome.is_recovered());
        assert!(!errors.is_offline());
        assert_eq!(
            errors.current().map(|e| e.category),
            Some(ErrorCategory::Service)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_metrics_add_up_across_concurrent_clears() {
        let (orchestrator, _) = orchestrator();
        let orchestrator = Arc::new(orchestrator);
        orchestrator.register_strategy(ErrorCategory::Network, FlakyStrategy::new(1, transient));

        let mut handles = Vec::new();
        for i in 0..8 {
            let orchestrator = orchestrator.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..50 {
                    let error = if (i + j) % 3 == 0 {
                        ClassifiedError::new("x", "y", ErrorSeverity::Error, ErrorCategory::Ui)
                    } else {
                        network_error()
                    };
                    orchestrator.attempt_recovery(&error).await;
                    if j % 10 == 0 {
                        orchestrator.clear_history();
                    }
                    let m = orchestrator.get_metrics();
                    assert_eq!(m.successes + m.failures, m.total_attempts, "{m:?}");
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let m = orchestrator.get_metrics();
        assert_eq!(m.successes + m.failures, m.total_attempts);
        assert!(orchestrator.history().len() as u64 <= m.total_attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_recheck_strategy() {
        let (orchestrator, _) = orchestrator();
        let registry = Arc::new(ServiceHealthRegistry::new());
        registry.register("speech", ServiceConfig::with_criticality(Criticality::Low));
        registry.record_check("speech", ServiceStatus::Failed);

        orchestrator.register_strategy(
            ErrorCategory::Service,
            Arc::new(HealthRecheckStrategy::new(
                registry.clone(),
                Arc::new(StatusProbe(ServiceStatus::Healthy)),
            )),
        );

        let error = ClassifiedError::new("Down", "down", ErrorSeverity::Error, ErrorCategory::Service)
            .with_service("speech");
        assert!(orchestrator.attempt_recovery(&error).await.is_recovered());
        assert_eq!(registry.get_health("speech").unwrap().status, ServiceStatus::Healthy);

        let anonymous = ClassifiedError::new("Down", "down", ErrorSeverity::Error, ErrorCategory::Service);
        assert!(matches!(
            orchestrator.attempt_recovery(&anonymous).await,
            RecoveryOutcome::Failed { attempts: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_recheck_degraded_is_failure() {
        let (orchestrator, _) = orchestrator();
        let registry = Arc::new(ServiceHealthRegistry::new());
        registry.register("speech", ServiceConfig::default());
        orchestrator.register_strategy(
            ErrorCategory::Service,
            Arc::new(HealthRecheckStrategy::new(
                registry.clone(),
                Arc::new(StatusProbe(ServiceStatus::Degraded)),
            )),
        );

        let error = ClassifiedError::new("Down", "down", ErrorSeverity::Error, ErrorCategory::Service)
            .with_service("speech");
        assert!(matches!(
            orchestrator.attempt_recovery(&error).await,
            RecoveryOutcome::Failed { attempts: 3, .. }
        ));
        assert_eq!(registry.get_health("speech").unwrap().status, ServiceStatus::Degraded);
    }
}
