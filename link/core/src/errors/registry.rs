//! Global Error Registry
//!
//! Process-wide record of classified errors: the error currently shown to the
//! user, a bounded history, the offline-mode flag and a lightweight cache of
//! per-service status for display.
//!
//! One instance is constructed by [`crate::context::LinkContext`] and shared by
//! `Arc`. Concurrent `show` calls are serialized by the state mutex: the last
//! one wins for the current error and history is append-only.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::classifier::{ClassifiedError, ErrorSeverity};
use crate::health::ServiceStatus;

/// Default number of errors kept in history
pub const DEFAULT_ERROR_HISTORY: usize = 50;

/// Published when the registry changes
#[derive(Clone, Debug, PartialEq)]
pub enum ErrorEvent {
    /// An error became current
    Shown(ClassifiedError),
    /// The current error was dismissed
    Hidden,
    /// History was emptied
    HistoryCleared,
    /// Offline mode was switched on or off
    OfflineModeChanged(bool),
    /// A cached service status changed
    ServiceStatusChanged {
        /// Service name
        name: String,
        /// New status
        status: ServiceStatus,
    },
}

#[derive(Default)]
struct RegistryState {
    current: Option<ClassifiedError>,
    history: VecDeque<ClassifiedError>,
}

/// Shared error state for the whole client
pub struct GlobalErrorRegistry {
    state: Mutex<RegistryState>,
    capacity: usize,
    offline: AtomicBool,
    service_statuses: DashMap<String, ServiceStatus>,
    events: broadcast::Sender<ErrorEvent>,
}

impl GlobalErrorRegistry {
    /// Create a registry keeping the default history length
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ERROR_HISTORY)
    }

    /// Create a registry keeping at most `capacity` errors
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(128);
        Self {
            state: Mutex::new(RegistryState::default()),
            capacity: capacity.max(1),
            offline: AtomicBool::new(false),
            service_statuses: DashMap::new(),
            events,
        }
    }

    /// Make an error current and append it to history
    ///
    /// Critical network errors also switch on offline mode.
    pub fn show(&self, error: ClassifiedError) {
        match error.severity {
            ErrorSeverity::Critical => tracing::error!(
                category = %error.category,
                context = %error.context,
                details = %error.technical_details,
                "{}", error.title
            ),
            ErrorSeverity::Error => tracing::warn!(
                category = %error.category,
                context = %error.context,
                details = %error.technical_details,
                "{}", error.title
            ),
            ErrorSeverity::Warning => tracing::info!(
                category = %error.category,
                context = %error.context,
                "{}", error.title
            ),
        }

        let forces_offline = error.forces_offline();
        {
            let mut state = self.state.lock();
            state.history.push_back(error.clone());
            while state.history.len() > self.capacity {
                state.history.pop_front();
            }
            state.current = Some(error.clone());
            // Sent under the lock so event order matches `current`
            let _ = self.events.send(ErrorEvent::Shown(error));
        }

        if forces_offline {
            self.set_offline(true);
        }
    }

    /// Dismiss the current error; history is untouched
    pub fn hide(&self) {
        self.hide_if(|_| true);
    }

    /// Dismiss the current error only if `pred` accepts it
    ///
    /// The check and the dismissal happen under one lock, so an error shown
    /// concurrently is never hidden by mistake. Returns whether it was hidden.
    pub fn hide_if(&self, pred: impl FnOnce(&ClassifiedError) -> bool) -> bool {
        let mut state = self.state.lock();
        if !state.current.as_ref().is_some_and(pred) {
            return false;
        }
        state.current = None;
        let _ = self.events.send(ErrorEvent::Hidden);
        true
    }

    /// Empty history; the current error and offline mode are untouched
    pub fn clear_history(&self) {
        let mut state = self.state.lock();
        state.history.clear();
        let _ = self.events.send(ErrorEvent::HistoryCleared);
    }

    /// Switch offline mode on
    pub fn enable_offline_mode(&self) {
        self.set_offline(true);
    }

    /// Switch offline mode off
    pub fn disable_offline_mode(&self) {
        self.set_offline(false);
    }

    /// Whether the client should behave as if no network is available
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Cache the latest observed status of a service
    pub fn update_service_status(&self, name: impl Into<String>, status: ServiceStatus) {
        let name = name.into();
        // The entry guard is held across the send so per-service events
        // arrive in the order the cache was written
        match self.service_statuses.entry(name.clone()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() != status {
                    entry.insert(status);
                    let _ = self
                        .events
                        .send(ErrorEvent::ServiceStatusChanged { name, status });
                }
            }
            Entry::Vacant(entry) => {
                let _guard = entry.insert(status);
                let _ = self
                    .events
                    .send(ErrorEvent::ServiceStatusChanged { name, status });
            }
        }
    }

    /// Cached status of one service
    #[must_use]
    pub fn service_status(&self, name: &str) -> Option<ServiceStatus> {
        self.service_statuses.get(name).map(|s| *s.value())
    }

    /// All cached service statuses
    #[must_use]
    pub fn service_statuses(&self) -> BTreeMap<String, ServiceStatus> {
        self.service_statuses
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Error currently shown, if any
    #[must_use]
    pub fn current(&self) -> Option<ClassifiedError> {
        self.state.lock().current.clone()
    }

    /// Most recently shown error still in history
    #[must_use]
    pub fn latest(&self) -> Option<ClassifiedError> {
        self.state.lock().history.back().cloned()
    }

    /// History snapshot, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<ClassifiedError> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Maximum history length
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe to registry changes
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ErrorEvent> {
        self.events.subscribe()
    }

    fn set_offline(&self, offline: bool) {
        let previous = self.offline.swap(offline, Ordering::SeqCst);
        if previous != offline {
            tracing::info!(offline, "Offline mode changed");
            let _ = self.events.send(ErrorEvent::OfflineModeChanged(offline));
        }
    }
}

impl Default for GlobalErrorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::classifier::ErrorCategory;

    fn error(severity: ErrorSeverity, category: ErrorCategory) -> ClassifiedError {
        ClassifiedError::new("title", "message", severity, category)
    }

    #[test]
    fn test_show_sets_current_and_history() {
        let registry = GlobalErrorRegistry::new();
        registry.show(error(ErrorSeverity::Error, ErrorCategory::Network).with_context("a"));
        registry.show(error(ErrorSeverity::Warning, ErrorCategory::Data).with_context("b"));

        assert_eq!(registry.current().unwrap().context, "b");
        assert_eq!(registry.latest().unwrap().context, "b");
        let contexts: Vec<_> = registry.history().into_iter().map(|e| e.context).collect();
        assert_eq!(contexts, vec!["a", "b"]);
    }

    #[test]
    fn test_hide_keeps_history() {
        let registry = GlobalErrorRegistry::new();
        registry.show(error(ErrorSeverity::Error, ErrorCategory::System));
        registry.hide();

        assert!(registry.current().is_none());
        assert_eq!(registry.history().len(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let registry = GlobalErrorRegistry::with_capacity(3);
        for i in 0..5 {
            registry.show(error(ErrorSeverity::Warning, ErrorCategory::Ui).with_context(i.to_string()));
        }
        let contexts: Vec<_> = registry.history().into_iter().map(|e| e.context).collect();
        assert_eq!(contexts, vec!["2", "3", "4"]);
    }

    #[test]
    fn test_critical_network_enables_offline() {
        let registry = GlobalErrorRegistry::new();
        registry.show(error(ErrorSeverity::Critical, ErrorCategory::Service));
        assert!(!registry.is_offline());

        registry.show(error(ErrorSeverity::Error, ErrorCategory::Network));
        assert!(!registry.is_offline());

        registry.show(error(ErrorSeverity::Critical, ErrorCategory::Network));
        assert!(registry.is_offline());
    }

    #[test]
    fn test_clear_history_keeps_offline() {
        let registry = GlobalErrorRegistry::new();
        registry.show(error(ErrorSeverity::Critical, ErrorCategory::Network));
        registry.clear_history();

        assert!(registry.history().is_empty());
        assert!(registry.is_offline());
    }

    #[test]
    fn test_offline_mode_idempotent() {
        let registry = GlobalErrorRegistry::new();
        let mut events = registry.subscribe();

        registry.enable_offline_mode();
        registry.enable_offline_mode();
        assert!(registry.is_offline());
        registry.disable_offline_mode();
        registry.disable_offline_mode();
        assert!(!registry.is_offline());

        assert_eq!(events.try_recv().unwrap(), ErrorEvent::OfflineModeChanged(true));
        assert_eq!(events.try_recv().unwrap(), ErrorEvent::OfflineModeChanged(false));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_service_status_cache() {
        let registry = GlobalErrorRegistry::new();
        registry.update_service_status("agent", ServiceStatus::Healthy);
        registry.update_service_status("speech", ServiceStatus::Degraded);
        registry.update_service_status("agent", ServiceStatus::Failed);

        assert_eq!(registry.service_status("agent"), Some(ServiceStatus::Failed));
        assert_eq!(registry.service_status("missing"), None);
        assert_eq!(registry.service_statuses().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_show_is_serialized() {
        let registry = std::sync::Arc::new(GlobalErrorRegistry::with_capacity(1000));
        let mut handles = Vec::new();
        for i in 0..20 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..10 {
                    registry.show(
                        error(ErrorSeverity::Warning, ErrorCategory::Ui)
                            .with_context(format!("{i}-{j}")),
                    );
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.history().len(), 200);
        assert_eq!(registry.current(), registry.latest());
    }

    #[test]
    fn test_last_shown_event_matches_current() {
        for _ in 0..50 {
            let registry = GlobalErrorRegistry::with_capacity(1000);
            let mut events = registry.subscribe();

            std::thread::scope(|scope| {
                for i in 0..8 {
                    let registry = &registry;
                    scope.spawn(move || {
                        for j in 0..12 {
                            registry.show(
                                error(ErrorSeverity::Warning, ErrorCategory::Ui)
                                    .with_context(format!("{i}-{j}")),
                            );
                        }
                    });
                }
            });

            let mut last_shown = None;
            while let Ok(event) = events.try_recv() {
                if let ErrorEvent::Shown(e) = event {
                    last_shown = Some(e);
                }
            }
            assert_eq!(last_shown, registry.current());
        }
    }

    #[test]
    fn test_hide_if_checks_current() {
        let registry = GlobalErrorRegistry::new();
        let mut events = registry.subscribe();
        registry.show(error(ErrorSeverity::Error, ErrorCategory::Service));

        assert!(!registry.hide_if(|e| e.category == ErrorCategory::Network));
        assert!(registry.current().is_some());

        assert!(registry.hide_if(|e| e.category == ErrorCategory::Service));
        assert!(registry.current().is_none());
        assert!(!registry.hide_if(|_| true));

        assert!(matches!(events.try_recv(), Ok(ErrorEvent::Shown(_))));
        assert_eq!(events.try_recv().unwrap(), ErrorEvent::Hidden);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_service_status_events_only_on_change() {
        let registry = GlobalErrorRegistry::new();
        let mut events = registry.subscribe();
        registry.update_service_status("agent", ServiceStatus::Healthy);
        registry.update_service_status("agent", ServiceStatus::Healthy);
        registry.update_service_status("agent", ServiceStatus::Failed);

        let statuses: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| match e {
                ErrorEvent::ServiceStatusChanged { status, .. } => status,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(statuses, vec![ServiceStatus::Healthy, ServiceStatus::Failed]);
    }
}
