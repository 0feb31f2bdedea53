//! Service Health Registry
//!
//! Per-service health bookkeeping: criticality assigned by the operator and
//! the most recent observed status.
//!
//! Records are created by [`ServiceHealthRegistry::register`] with status
//! `Unknown` and are only changed by recorded check results. Running the
//! check itself is the job of a [`HealthProbe`]; the registry just owns the
//! bookkeeping contract.
//!
//! # Thread Safety
//!
//! Records live in a `DashMap` keyed by service name. Status changes are
//! published on a broadcast channel so collaborators (the error registry's
//! status cache, UIs) can follow along without polling.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

// ============================================================================
// Status & Criticality
// ============================================================================

/// Operator-assigned importance tier, independent of current health
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    /// Nice to have
    Low,
    /// Features degrade without it
    #[default]
    Medium,
    /// The client cannot work without it
    High,
}

/// Last observed health of a service
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// No check result yet
    #[default]
    Unknown,
    /// Responding normally
    Healthy,
    /// Responding with problems
    Degraded,
    /// Not responding
    Failed,
}

impl ServiceStatus {
    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Service-level failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// No service is registered under this name
    #[error("Service not registered: {0}")]
    Unregistered(String),

    /// Service answered with an error or could not be reached
    #[error("Service {service} unavailable: {reason}")]
    Unavailable {
        /// Service name
        service: String,
        /// What went wrong
        reason: String,
    },

    /// Health check did not answer in time
    #[error("Service {service} did not respond within {timeout_secs}s")]
    Timeout {
        /// Service name
        service: String,
        /// Configured timeout
        timeout_secs: u64,
    },
}

impl ServiceError {
    /// Whether a later check may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Unregistered(_))
    }
}

// ============================================================================
// Records
// ============================================================================

/// Registration settings for a service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Where a probe should look (e.g. `http://10.0.0.5:8000/health`)
    pub health_endpoint_hint: Option<String>,
    /// Importance tier
    pub criticality: Criticality,
    /// Interval between checks
    pub check_interval_secs: u64,
    /// Bound on a single check
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            health_endpoint_hint: None,
            criticality: Criticality::Medium,
            check_interval_secs: 30,
            timeout_secs: 5,
        }
    }
}

impl ServiceConfig {
    /// Config with the given criticality and default timings
    #[must_use]
    pub fn with_criticality(criticality: Criticality) -> Self {
        Self {
            criticality,
            ..Self::default()
        }
    }

    /// Set the health endpoint hint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.health_endpoint_hint = Some(endpoint.into());
        self
    }
}

/// Health bookkeeping for one named service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealthRecord {
    /// Service name
    pub name: String,
    /// Importance tier
    pub criticality: Criticality,
    /// Last observed status
    pub status: ServiceStatus,
    /// Interval between checks
    pub health_check_interval_secs: u64,
    /// Bound on a single check
    pub timeout_secs: u64,
    /// Where a probe should look
    pub health_endpoint_hint: Option<String>,
    /// When the status was last recorded
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl ServiceHealthRecord {
    fn new(name: String, config: ServiceConfig) -> Self {
        Self {
            name,
            criticality: config.criticality,
            status: ServiceStatus::Unknown,
            health_check_interval_secs: config.check_interval_secs,
            timeout_secs: config.timeout_secs,
            health_endpoint_hint: config.health_endpoint_hint,
            last_checked_at: None,
        }
    }

    fn apply_config(&mut self, config: ServiceConfig) {
        self.criticality = config.criticality;
        self.health_check_interval_secs = config.check_interval_secs;
        self.timeout_secs = config.timeout_secs;
        self.health_endpoint_hint = config.health_endpoint_hint;
    }

    /// Bound on a single check
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Published when records change
#[derive(Clone, Debug, PartialEq)]
pub enum HealthEvent {
    /// A service was registered or re-registered
    Registered {
        /// Service name
        name: String,
    },
    /// A recorded check changed the status
    StatusChanged {
        /// Service name
        name: String,
        /// Status before the check
        previous: ServiceStatus,
        /// Status after the check
        current: ServiceStatus,
    },
}

// ============================================================================
// Registry
// ============================================================================

/// Registry of named services and their health
pub struct ServiceHealthRegistry {
    records: DashMap<String, ServiceHealthRecord>,
    events: broadcast::Sender<HealthEvent>,
}

impl ServiceHealthRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            records: DashMap::new(),
            events,
        }
    }

    /// Register a service
    ///
    /// Re-registering keeps the current status and replaces the configuration.
    pub fn register(&self, name: impl Into<String>, config: ServiceConfig) {
        let name = name.into();
        let criticality = config.criticality;
        self.records
            .entry(name.clone())
            .and_modify(|record| record.apply_config(config.clone()))
            .or_insert_with(|| ServiceHealthRecord::new(name.clone(), config));

        tracing::debug!(service = %name, ?criticality, "Service registered");
        let _ = self.events.send(HealthEvent::Registered { name });
    }

    /// Snapshot of one record
    #[must_use]
    pub fn get_health(&self, name: &str) -> Option<ServiceHealthRecord> {
        self.records.get(name).map(|r| r.value().clone())
    }

    /// Record a check result
    ///
    /// Returns `false` (and records nothing) for unregistered names.
    pub fn record_check(&self, name: &str, status: ServiceStatus) -> bool {
        let Some(mut record) = self.records.get_mut(name) else {
            tracing::warn!(service = %name, %status, "Check result for unregistered service ignored");
            return false;
        };
        let previous = record.status;
        record.status = status;
        record.last_checked_at = Some(Utc::now());

        if previous != status {
            match status {
                ServiceStatus::Failed => {
                    tracing::warn!(service = %name, %previous, "Service failed");
                }
                ServiceStatus::Degraded => {
                    tracing::warn!(service = %name, %previous, "Service degraded");
                }
                _ => tracing::info!(service = %name, %previous, current = %status, "Service status changed"),
            }
            // Sent while the record is still locked so events for one service
            // arrive in write order
            let _ = self.events.send(HealthEvent::StatusChanged {
                name: name.to_string(),
                previous,
                current: status,
            });
        }
        true
    }

    /// Put a service back to `Unknown`
    pub fn reset_status(&self, name: &str) -> bool {
        self.record_check(name, ServiceStatus::Unknown)
    }

    /// Run a probe against a service and record the result
    ///
    /// The probe is bounded by the record's timeout; a timeout or probe error is
    /// recorded as `Failed`.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Unregistered` for unknown names, or the probe's
    /// error after recording the failure.
    pub async fn run_check(
        &self,
        name: &str,
        probe: &dyn HealthProbe,
    ) -> Result<ServiceStatus, ServiceError> {
        let record = self
            .get_health(name)
            .ok_or_else(|| ServiceError::Unregistered(name.to_string()))?;

        let result = match tokio::time::timeout(record.timeout(), probe.check(&record)).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout {
                service: record.name.clone(),
                timeout_secs: record.timeout_secs,
            }),
        };

        match result {
            Ok(status) => {
                self.record_check(name, status);
                Ok(status)
            }
            Err(e) => {
                tracing::debug!(service = %name, probe = probe.name(), error = %e, "Health check failed");
                self.record_check(name, ServiceStatus::Failed);
                Err(e)
            }
        }
    }

    /// Names of high-criticality services
    #[must_use]
    pub fn critical_services(&self) -> BTreeSet<String> {
        self.names_where(|r| r.criticality == Criticality::High)
    }

    /// Names of services whose last check failed
    #[must_use]
    pub fn failed_services(&self) -> BTreeSet<String> {
        self.names_where(|r| r.status == ServiceStatus::Failed)
    }

    /// Names of services whose last check was degraded
    #[must_use]
    pub fn degraded_services(&self) -> BTreeSet<String> {
        self.names_where(|r| r.status == ServiceStatus::Degraded)
    }

    /// All registered names
    #[must_use]
    pub fn names(&self) -> BTreeSet<String> {
        self.names_where(|_| true)
    }

    /// Whether any high-criticality service has failed
    #[must_use]
    pub fn has_critical_failure(&self) -> bool {
        self.records.iter().any(|r| {
            r.criticality == Criticality::High && r.status == ServiceStatus::Failed
        })
    }

    /// Aggregate status across all services
    ///
    /// Failed if a high-criticality service failed, degraded if anything is
    /// degraded or failed, healthy if everything is healthy, unknown otherwise.
    #[must_use]
    pub fn overall_status(&self) -> ServiceStatus {
        if self.has_critical_failure() {
            return ServiceStatus::Failed;
        }

        let mut all_healthy = !self.records.is_empty();
        for record in &self.records {
            match record.status {
                ServiceStatus::Degraded | ServiceStatus::Failed => return ServiceStatus::Degraded,
                ServiceStatus::Unknown => all_healthy = false,
                ServiceStatus::Healthy => {}
            }
        }

        if all_healthy {
            ServiceStatus::Healthy
        } else {
            ServiceStatus::Unknown
        }
    }

    /// Number of registered services
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Subscribe to record changes
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    fn names_where(&self, predicate: impl Fn(&ServiceHealthRecord) -> bool) -> BTreeSet<String> {
        self.records
            .iter()
            .filter(|r| predicate(r.value()))
            .map(|r| r.key().clone())
            .collect()
    }
}

impl Default for ServiceHealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Probes
// ============================================================================

/// Performs the actual health check for a service
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Check one service
    async fn check(&self, record: &ServiceHealthRecord) -> Result<ServiceStatus, ServiceError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// HTTP GET against the record's endpoint hint
///
/// 2xx is healthy, 5xx is failed, anything else is degraded.
#[derive(Clone, Debug, Default)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    /// Create a probe with a default client
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a probe with a preconfigured client
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Status implied by an HTTP status code
#[must_use]
pub fn status_from_http(code: reqwest::StatusCode) -> ServiceStatus {
    if code.is_success() {
        ServiceStatus::Healthy
    } else if code.is_server_error() {
        ServiceStatus::Failed
    } else {
        ServiceStatus::Degraded
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, record: &ServiceHealthRecord) -> Result<ServiceStatus, ServiceError> {
        let Some(url) = record.health_endpoint_hint.as_deref() else {
            return Err(ServiceError::Unavailable {
                service: record.name.clone(),
                reason: "no health endpoint configured".to_string(),
            });
        };

        let response = self
            .client
            .get(url)
            .timeout(record.timeout())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::Timeout {
                        service: record.name.clone(),
                        timeout_secs: record.timeout_secs,
                    }
                } else {
                    ServiceError::Unavailable {
                        service: record.name.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        Ok(status_from_http(response.status()))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
