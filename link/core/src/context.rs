//! Process Context
//!
//! [`LinkContext`] owns the single instance of every shared component. It is
//! built once at startup and handed to whatever needs it, so nothing in the
//! crate relies on global state.
//!
//! ```text
//! TransportSession --ErrorChanged--> forwarder --show--> GlobalErrorRegistry
//! ServiceHealthRegistry --StatusChanged--> forwarder --update_service_status-->
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::config::LinkConfig;
use crate::errors::{ErrorCategory, GlobalErrorRegistry};
use crate::health::{HealthEvent, HealthProbe, HttpHealthProbe, ServiceHealthRegistry};
use crate::profiles::{
    ConnectionProfileStore, FileProfileStorage, MemoryProfileStorage, ProfileStorage,
};
use crate::recovery::{HealthRecheckStrategy, ReconnectStrategy, RecoveryOrchestrator};
use crate::retry::RetryEngine;
use crate::transport::{SessionEvent, Transport, TransportSession};

/// Shared components of an agent-link client
pub struct LinkContext {
    /// Saved connection profiles
    pub store: Arc<ConnectionProfileStore>,
    /// Classified errors and offline mode
    pub errors: Arc<GlobalErrorRegistry>,
    /// Dependent service health
    pub health: Arc<ServiceHealthRegistry>,
    /// Shared retry engine
    pub retry: Arc<RetryEngine>,
    /// The transport session
    pub session: TransportSession,
    /// Recovery strategies per error category
    pub recovery: Arc<RecoveryOrchestrator>,
    config: LinkConfig,
    forwarder: JoinHandle<()>,
}

impl LinkContext {
    /// Build the context with the HTTP health probe
    ///
    /// Must be called from within a tokio runtime.
    pub fn init(
        config: LinkConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn ProfileStorage>,
    ) -> Self {
        Self::init_with_probe(config, transport, storage, Arc::new(HttpHealthProbe::new()))
    }

    /// Build the context with a custom health probe
    ///
    /// Must be called from within a tokio runtime.
    pub fn init_with_probe(
        config: LinkConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn ProfileStorage>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        let store = Arc::new(ConnectionProfileStore::open(storage));
        let errors = Arc::new(GlobalErrorRegistry::with_capacity(
            config.error_history_capacity,
        ));
        let health = Arc::new(ServiceHealthRegistry::new());
        let retry = Arc::new(RetryEngine::from_config(&config.retry));
        let session = TransportSession::new(transport, Arc::clone(&store), config.transport.clone());

        let recovery = Arc::new(RecoveryOrchestrator::new(
            Arc::clone(&retry),
            Arc::clone(&errors),
            config.retry.policy(),
        ));
        recovery.register_strategy(
            ErrorCategory::Network,
            Arc::new(ReconnectStrategy::new(session.clone())),
        );
        recovery.register_strategy(
            ErrorCategory::Service,
            Arc::new(HealthRecheckStrategy::new(Arc::clone(&health), probe)),
        );

        let forwarder = spawn_forwarder(&session, &health, Arc::clone(&errors));

        tracing::debug!(
            connect_timeout_ms = config.transport.connect_timeout_ms,
            retry_attempts = config.retry.max_attempts,
            "Link context initialized"
        );

        Self {
            store,
            errors,
            health,
            retry,
            session,
            recovery,
            config,
            forwarder,
        }
    }

    /// Storage backend for `config`
    ///
    /// Uses the configured path, then the platform data directory. Falls back
    /// to memory when neither is available.
    #[must_use]
    pub fn storage_for(config: &LinkConfig) -> Arc<dyn ProfileStorage> {
        let path: Option<PathBuf> = config
            .profile_store_path
            .clone()
            .or_else(FileProfileStorage::default_path);
        match path {
            Some(path) => Arc::new(FileProfileStorage::new(path)),
            None => {
                tracing::warn!("No data directory available, profiles will not be persisted");
                Arc::new(MemoryProfileStorage::new())
            }
        }
    }

    /// Configuration the context was built with
    #[must_use]
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }
}

impl Drop for LinkContext {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Forward component events into the error registry
fn spawn_forwarder(
    session: &TransportSession,
    health: &ServiceHealthRegistry,
    errors: Arc<GlobalErrorRegistry>,
) -> JoinHandle<()> {
    let mut session_events = session.subscribe();
    let mut health_events = health.subscribe();

    tokio::spawn(async move {
        let mut session_open = true;
        let mut health_open = true;

        while session_open || health_open {
            tokio::select! {
                event = session_events.recv(), if session_open => match event {
                    Ok(SessionEvent::ErrorChanged(Some(error))) => errors.show(error),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Error forwarder lagged behind session events");
                    }
                    Err(RecvError::Closed) => session_open = false,
                },
                event = health_events.recv(), if health_open => match event {
                    Ok(HealthEvent::StatusChanged { name, current, .. }) => {
                        errors.update_service_status(name, current);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Error forwarder lagged behind health events");
                    }
                    Err(RecvError::Closed) => health_open = false,
                },
            }
        }
    })
}
