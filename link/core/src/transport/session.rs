//! Transport Session
//!
//! The live connection state machine and its message history.
//!
//! ```text
//! Disconnected --connect--> Connecting --handshake ok--> Connected
//!      ^                        |                           |
//!      +--timeout / failure-----+                           |
//!      +--disconnect / remote close-------------------------+
//! ```
//!
//! # Guarantees
//!
//! - All state (lifecycle, history, last error) sits behind one mutex, so a
//!   send can never race the "not connected" check against a disconnect.
//! - Every connect or disconnect bumps a generation counter. A connect attempt
//!   whose generation is stale when it completes is discarded, so the session
//!   always reflects the last initiated attempt.
//! - Failures are classified before they become `last_error`; successes clear
//!   it. The session never retries by itself.
//!
//! Changes are published as [`SessionEvent`]s in the order they were applied.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::config::TransportConfig;
use super::traits::{InboundFrame, OutboundFrame, Transport, TransportError};
use crate::errors::{ClassifiedError, ErrorClassifier};
use crate::messages::AgentMessage;
use crate::pairing::{DecodeError, PairingCodec};
use crate::profiles::{ConnectionProfile, ConnectionProfileStore};

/// Capacity of the session event channel
const EVENT_CAPACITY: usize = 256;

/// Connection lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No connection and no attempt in flight
    #[default]
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Connected and able to send
    Connected,
}

impl SessionState {
    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable session changes
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Lifecycle state changed
    StateChanged {
        /// State before the change
        previous: SessionState,
        /// State after the change
        current: SessionState,
    },
    /// A message was appended to history
    MessageAppended(AgentMessage),
    /// `last_error` was set or cleared
    ErrorChanged(Option<ClassifiedError>),
    /// History was emptied
    HistoryCleared,
}

/// Failure of [`TransportSession::connect_with_pairing`]
#[derive(Debug, Error)]
pub enum PairingError {
    /// The payload could not be decoded; no connection was attempted
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The payload was valid but connecting failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Default)]
struct SessionInner {
    state: SessionState,
    history: Vec<AgentMessage>,
    last_error: Option<ClassifiedError>,
    generation: u64,
    active_profile: Option<ConnectionProfile>,
    outbound: Option<mpsc::Sender<OutboundFrame>>,
    cancel: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<()>>,
}

impl SessionInner {
    /// Start a new generation, cancelling any attempt and dropping any link
    fn supersede(&mut self) -> u64 {
        self.generation += 1;
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        self.outbound = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.generation
    }
}

struct Shared {
    inner: Mutex<SessionInner>,
    transport: Arc<dyn Transport>,
    store: Arc<ConnectionProfileStore>,
    config: TransportConfig,
    classifier: ErrorClassifier,
    events: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn set_state(&self, inner: &mut SessionInner, state: SessionState) {
        if inner.state == state {
            return;
        }
        let previous = std::mem::replace(&mut inner.state, state);
        tracing::debug!(%previous, current = %state, "Session state changed");
        let _ = self.events.send(SessionEvent::StateChanged {
            previous,
            current: state,
        });
    }

    fn set_error(&self, inner: &mut SessionInner, error: Option<ClassifiedError>) {
        if inner.last_error.is_none() && error.is_none() {
            return;
        }
        inner.last_error.clone_from(&error);
        let _ = self.events.send(SessionEvent::ErrorChanged(error));
    }

    fn fail(&self, inner: &mut SessionInner, err: &TransportError, context: &str) {
        let classified = self.classifier.classify(err, Some(context));
        self.set_error(inner, Some(classified));
    }

    fn append(&self, inner: &mut SessionInner, message: AgentMessage) {
        inner.history.push(message.clone());
        let _ = self.events.send(SessionEvent::MessageAppended(message));
    }

    fn apply_inbound(&self, generation: u64, frame: InboundFrame) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        match frame {
            Ok(message) => {
                tracing::trace!(kind = %message.kind, "Inbound message");
                self.append(&mut inner, message);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping unreadable inbound frame");
                self.fail(&mut inner, &e, "receive");
            }
        }
    }

    fn link_closed(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.state != SessionState::Connected {
            return;
        }
        inner.outbound = None;
        inner.reader = None;

        tracing::warn!(
            profile = ?inner.active_profile.as_ref().map(ConnectionProfile::key),
            "Connection lost"
        );
        self.fail(&mut inner, &TransportError::ConnectionLost, "receive");
        self.set_state(&mut inner, SessionState::Disconnected);
    }
}

async fn run_reader(
    shared: Weak<Shared>,
    generation: u64,
    mut inbound: mpsc::Receiver<InboundFrame>,
) {
    while let Some(frame) = inbound.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        shared.apply_inbound(generation, frame);
    }
    if let Some(shared) = shared.upgrade() {
        shared.link_closed(generation);
    }
}

/// Connection state machine with message history
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct TransportSession {
    shared: Arc<Shared>,
}

impl TransportSession {
    /// Create a disconnected session
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<ConnectionProfileStore>,
        config: TransportConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(SessionInner::default()),
                transport,
                store,
                config,
                classifier: ErrorClassifier::new(),
                events,
            }),
        }
    }

    /// Connect to a profile
    ///
    /// Waits for the handshake, bounded by the connect timeout. Any attempt
    /// already in flight is cancelled, and any open connection is closed.
    /// On success the profile is saved as current in the store.
    ///
    /// # Errors
    ///
    /// - `TransportError::Timeout` if the handshake did not finish in time
    /// - `TransportError::Cancelled` if a later `connect` or `disconnect`
    ///   superseded this attempt (session state reflects the later call)
    /// - Any error reported by the transport
    pub async fn connect(&self, profile: ConnectionProfile) -> Result<(), TransportError> {
        let shared = &self.shared;
        let endpoint = profile.endpoint();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let generation = {
            let mut inner = shared.inner.lock();
            let generation = inner.supersede();
            inner.cancel = Some(cancel_tx);
            inner.active_profile = Some(profile.clone());
            shared.set_state(&mut inner, SessionState::Connecting);
            generation
        };

        tracing::info!(
            endpoint = %endpoint,
            transport = shared.transport.name(),
            "Connecting"
        );

        let limit = shared.config.connect_timeout();
        let attempt = tokio::time::timeout(limit, shared.transport.connect(&endpoint, &shared.config));
        let outcome = tokio::select! {
            result = attempt => match result {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(limit)),
            },
            _ = cancel_rx => Err(TransportError::Cancelled),
        };

        {
            let mut inner = shared.inner.lock();
            if inner.generation != generation {
                tracing::debug!(endpoint = %endpoint, "Discarding superseded connection attempt");
                return Err(TransportError::Cancelled);
            }
            inner.cancel = None;

            match outcome {
                Ok(link) => {
                    inner.outbound = Some(link.outbound);
                    inner.reader = Some(tokio::spawn(run_reader(
                        Arc::downgrade(shared),
                        generation,
                        link.inbound,
                    )));
                    shared.set_error(&mut inner, None);
                    shared.set_state(&mut inner, SessionState::Connected);
                }
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint, error = %e, "Connection attempt failed");
                    shared.fail(&mut inner, &e, "connect");
                    shared.set_state(&mut inner, SessionState::Disconnected);
                    return Err(e);
                }
            }
        }

        self.persist_connected(profile, generation).await;
        tracing::info!(endpoint = %endpoint, "Connected");
        Ok(())
    }

    /// Save a freshly connected profile as current
    ///
    /// Storage may write files, so the save runs on the blocking pool with the
    /// session lock released. The generation is re-checked under the store's
    /// write lock: a connection superseded before its save lands is not
    /// recorded, and a later connection's save always queues behind it.
    async fn persist_connected(&self, profile: ConnectionProfile, generation: u64) {
        let shared = Arc::clone(&self.shared);
        let key = profile.key();
        let save = tokio::task::spawn_blocking(move || {
            let store = Arc::clone(&shared.store);
            store.save_if(profile, || shared.inner.lock().generation == generation)
        });
        if let Err(e) = save.await {
            tracing::warn!(profile = %key, error = %e, "Profile save task failed");
        }
    }

    /// Decode a pairing payload and connect to the server it describes
    ///
    /// A payload that fails to decode sets `last_error` and never moves the
    /// session to `Connecting`.
    ///
    /// # Errors
    ///
    /// `PairingError::Decode` for bad payloads, `PairingError::Transport` for
    /// connection failures.
    pub async fn connect_with_pairing(
        &self,
        payload: &[u8],
    ) -> Result<ConnectionProfile, PairingError> {
        let profile = match PairingCodec::decode(payload) {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected pairing payload");
                let classified = self.shared.classifier.classify(&e, Some("pairing"));
                let mut inner = self.shared.inner.lock();
                self.shared.set_error(&mut inner, Some(classified));
                return Err(e.into());
            }
        };

        self.connect(profile.clone()).await?;
        Ok(profile)
    }

    /// Reconnect to the store's current profile, or the last profile used
    ///
    /// # Errors
    ///
    /// `TransportError::NoProfile` if there is nothing to reconnect to, or any
    /// error from [`connect`](Self::connect).
    pub async fn reconnect(&self) -> Result<(), TransportError> {
        let profile = self
            .shared
            .store
            .current()
            .or_else(|| self.shared.inner.lock().active_profile.clone());

        match profile {
            Some(profile) => self.connect(profile).await,
            None => {
                let err = TransportError::NoProfile;
                let mut inner = self.shared.inner.lock();
                self.shared.fail(&mut inner, &err, "reconnect");
                Err(err)
            }
        }
    }

    /// Close the connection or cancel the attempt in flight, clearing `last_error`
    pub fn disconnect(&self) {
        let mut inner = self.shared.inner.lock();
        inner.supersede();
        self.shared.set_error(&mut inner, None);
        if inner.state != SessionState::Disconnected {
            tracing::info!("Disconnected");
        }
        self.shared.set_state(&mut inner, SessionState::Disconnected);
    }

    /// Append a message to history and transmit it
    ///
    /// Waits at most the send timeout for the frame to be written.
    ///
    /// # Errors
    ///
    /// - `TransportError::NotConnected` if the session is not connected; the
    ///   message is not appended
    /// - `TransportError::SendFailed` if the write failed or timed out; the
    ///   message stays in history and the session stays connected
    pub async fn send(&self, message: AgentMessage) -> Result<(), TransportError> {
        let shared = &self.shared;

        let (outbound, generation) = {
            let mut inner = shared.inner.lock();
            let outbound = match (inner.state, inner.outbound.clone()) {
                (SessionState::Connected, Some(outbound)) => outbound,
                _ => {
                    let err = TransportError::NotConnected;
                    tracing::debug!(state = %inner.state, "Send rejected");
                    shared.fail(&mut inner, &err, "send");
                    return Err(err);
                }
            };
            shared.append(&mut inner, message.clone());
            (outbound, inner.generation)
        };

        let limit = shared.config.send_timeout();
        let (ack, ack_rx) = oneshot::channel();
        let transmit = async {
            outbound
                .send(OutboundFrame { message, ack })
                .await
                .map_err(|_| TransportError::SendFailed("connection closed".to_string()))?;
            ack_rx
                .await
                .map_err(|_| TransportError::SendFailed("writer stopped".to_string()))?
        };
        let result = tokio::time::timeout(limit, transmit)
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::SendFailed(format!(
                    "timed out after {}ms",
                    limit.as_millis()
                )))
            });

        let mut inner = shared.inner.lock();
        if inner.generation == generation {
            match &result {
                Ok(()) => shared.set_error(&mut inner, None),
                Err(e) => {
                    tracing::warn!(error = %e, "Send failed");
                    shared.fail(&mut inner, e, "send");
                }
            }
        }
        result
    }

    /// Send a plain text message
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_text(&self, content: impl Into<String>) -> Result<(), TransportError> {
        self.send(AgentMessage::text(content)).await
    }

    /// Send a command message
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_command(&self, content: impl Into<String>) -> Result<(), TransportError> {
        self.send(AgentMessage::command(content)).await
    }

    /// Append a server message to history without changing state
    pub fn receive_inbound_message(&self, message: AgentMessage) {
        let mut inner = self.shared.inner.lock();
        self.shared.append(&mut inner, message);
    }

    /// Empty the message history
    pub fn clear_history(&self) {
        let mut inner = self.shared.inner.lock();
        inner.history.clear();
        let _ = self.shared.events.send(SessionEvent::HistoryCleared);
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    /// Whether the session can send
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Human-readable connection status
    #[must_use]
    pub fn status_text(&self) -> String {
        let inner = self.shared.inner.lock();
        let label = inner
            .active_profile
            .as_ref()
            .map_or_else(String::new, ConnectionProfile::label);
        match inner.state {
            SessionState::Disconnected => "Disconnected".to_string(),
            SessionState::Connecting => format!("Connecting to {label}"),
            SessionState::Connected => format!("Connected to {label}"),
        }
    }

    /// Most recent classified failure, cleared by the next success
    #[must_use]
    pub fn last_error(&self) -> Option<ClassifiedError> {
        self.shared.inner.lock().last_error.clone()
    }

    /// Snapshot of the message history, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<AgentMessage> {
        self.shared.inner.lock().history.clone()
    }

    /// Profile of the current or most recent attempt
    #[must_use]
    pub fn active_profile(&self) -> Option<ConnectionProfile> {
        self.shared.inner.lock().active_profile.clone()
    }

    /// Profile store this session saves to
    #[must_use]
    pub fn store(&self) -> &Arc<ConnectionProfileStore> {
        &self.shared.store
    }

    /// Transport settings
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    /// Subscribe to session changes
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("TransportSession")
            .field("state", &inner.state)
            .field("history", &inner.history.len())
            .field("generation", &inner.generation)
            .field("transport", &self.shared.transport.name())
            .finish()
    }
}
