//! In-Memory Transport
//!
//! Channel-backed [`Transport`] with a scriptable server side. Used by tests and
//! by embedders that host the agent in the same process.
//!
//! # Usage
//!
//! ```ignore
//! let (transport, server) = InMemoryTransport::new();
//! server.push_handshake(Handshake::Hang);
//!
//! let session = TransportSession::new(Arc::new(transport), store, config);
//! session.connect(profile).await; // times out
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::traits::{InboundFrame, Transport, TransportError, TransportLink};
use super::wire;
use crate::messages::AgentMessage;
use crate::transport::config::{Endpoint, TransportConfig};

/// How the fake server answers the next handshake
#[derive(Clone, Debug)]
pub enum Handshake {
    /// Complete the handshake
    Accept,
    /// Complete the handshake after a delay
    Delay(Duration),
    /// Never answer
    Hang,
    /// Refuse the TCP connection
    Refuse,
    /// Reach the server but reject the session
    Reject(String),
    /// Deny authorization
    Unauthorized,
}

struct ServerState {
    script: VecDeque<Handshake>,
    default: Handshake,
}

/// Client half: implements [`Transport`]
pub struct InMemoryTransport {
    state: Arc<Mutex<ServerState>>,
    accepted_tx: mpsc::UnboundedSender<ServerConnection>,
    attempts: Arc<AtomicUsize>,
    fail_sends: Arc<AtomicBool>,
}

/// Server half: controls handshakes and observes connections
pub struct InMemoryServer {
    state: Arc<Mutex<ServerState>>,
    accepted_rx: mpsc::UnboundedReceiver<ServerConnection>,
    attempts: Arc<AtomicUsize>,
    fail_sends: Arc<AtomicBool>,
}

/// One accepted connection, seen from the server
pub struct ServerConnection {
    /// Endpoint the client dialed
    pub endpoint: Endpoint,
    received_rx: mpsc::UnboundedReceiver<AgentMessage>,
    inbound_tx: mpsc::Sender<InboundFrame>,
}

impl InMemoryTransport {
    /// Create a transport and its controlling server
    #[must_use]
    pub fn new() -> (Self, InMemoryServer) {
        let state = Arc::new(Mutex::new(ServerState {
            script: VecDeque::new(),
            default: Handshake::Accept,
        }));
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let attempts = Arc::new(AtomicUsize::new(0));
        let fail_sends = Arc::new(AtomicBool::new(false));

        (
            Self {
                state: Arc::clone(&state),
                accepted_tx,
                attempts: Arc::clone(&attempts),
                fail_sends: Arc::clone(&fail_sends),
            },
            InMemoryServer {
                state,
                accepted_rx,
                attempts,
                fail_sends,
            },
        )
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        config: &TransportConfig,
    ) -> Result<TransportLink, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let handshake = {
            let mut state = self.state.lock();
            state.script.pop_front().unwrap_or_else(|| state.default.clone())
        };

        match handshake {
            Handshake::Accept => {}
            Handshake::Delay(delay) => tokio::time::sleep(delay).await,
            Handshake::Hang => std::future::pending::<()>().await,
            Handshake::Refuse => {
                return Err(TransportError::ConnectionFailed(format!(
                    "{endpoint}: connection refused"
                )))
            }
            Handshake::Reject(reason) => return Err(TransportError::HandshakeFailed(reason)),
            Handshake::Unauthorized => {
                return Err(TransportError::Unauthorized("pairing token rejected".into()))
            }
        }

        let (link, mut peer) = TransportLink::channel(config.channel_capacity);
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let fail_sends = Arc::clone(&self.fail_sends);

        // Writer: acknowledge frames the way a socket write would
        tokio::spawn(async move {
            while let Some(frame) = peer.outbound_rx.recv().await {
                let result = if fail_sends.load(Ordering::SeqCst) {
                    Err(TransportError::SendFailed("injected write failure".into()))
                } else {
                    let _ = received_tx.send(frame.message);
                    Ok(())
                };
                let _ = frame.ack.send(result);
            }
            tracing::debug!("In-memory client closed its outbound channel");
        });

        let connection = ServerConnection {
            endpoint: endpoint.clone(),
            received_rx,
            inbound_tx: peer.inbound_tx,
        };
        if self.accepted_tx.send(connection).is_err() {
            return Err(TransportError::ConnectionFailed(
                "in-memory server dropped".into(),
            ));
        }

        Ok(link)
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

impl InMemoryServer {
    /// Queue the answer for the next handshake
    pub fn push_handshake(&self, handshake: Handshake) {
        self.state.lock().script.push_back(handshake);
    }

    /// Answer used once the script is empty
    pub fn set_default_handshake(&self, handshake: Handshake) {
        self.state.lock().default = handshake;
    }

    /// Make every subsequent write fail (or succeed again)
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Number of connect attempts seen so far
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted connection
    pub async fn accept(&mut self) -> Option<ServerConnection> {
        self.accepted_rx.recv().await
    }

    /// Accepted connection, if one is already waiting
    pub fn try_accept(&mut self) -> Option<ServerConnection> {
        self.accepted_rx.try_recv().ok()
    }
}

impl ServerConnection {
    /// Next message written by the client
    pub async fn recv(&mut self) -> Option<AgentMessage> {
        self.received_rx.recv().await
    }

    /// Message written by the client, if one is waiting
    pub fn try_recv(&mut self) -> Option<AgentMessage> {
        self.received_rx.try_recv().ok()
    }

    /// Deliver a message to the client
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionLost` if the client side is gone.
    pub async fn push(&self, message: AgentMessage) -> Result<(), TransportError> {
        self.inbound_tx
            .send(Ok(message))
            .await
            .map_err(|_| TransportError::ConnectionLost)
    }

    /// Deliver a raw text frame, decoded as the WebSocket reader would
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionLost` if the client side is gone.
    pub async fn push_raw(&self, text: &str) -> Result<(), TransportError> {
        self.inbound_tx
            .send(wire::decode(text))
            .await
            .map_err(|_| TransportError::ConnectionLost)
    }

    /// Drop the connection from the server side
    pub fn close(self) {
        tracing::debug!(endpoint = %self.endpoint, "In-memory server closed connection");
    }
}
