//! Transport Traits
//!
//! The [`Transport`] capability is the seam between the session state machine
//! and the actual network. Implementations perform the handshake and hand back
//! a [`TransportLink`]: a pair of channels serviced by their own reader/writer
//! tasks, so the session never touches sockets directly.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::messages::AgentMessage;
use crate::transport::config::{Endpoint, TransportConfig};

/// Errors that can occur during transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// Handshake did not complete in time
    #[error("Connection timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),

    /// Server was reached but refused the session
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Operation requires an established connection
    #[error("Not connected")]
    NotConnected,

    /// The server could not be reached
    #[error("Cannot connect: {0}")]
    ConnectionFailed(String),

    /// No network route at all
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// An established connection dropped
    #[error("Connection lost")]
    ConnectionLost,

    /// A frame could not be written
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Server denied access
    #[error("Authorization denied: {0}")]
    Unauthorized(String),

    /// Server has no endpoint at the requested path
    #[error("Not found: {0}")]
    NotFound(String),

    /// Frame could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Attempt was superseded by a newer connect or a disconnect
    #[error("Connection attempt cancelled")]
    Cancelled,

    /// Reconnect requested with no saved profile
    #[error("No saved server profile")]
    NoProfile,
}

impl TransportError {
    /// Whether retrying the same operation may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::ConnectionFailed(_)
                | Self::NetworkUnavailable(_)
                | Self::ConnectionLost
                | Self::HandshakeFailed(_)
                | Self::SendFailed(_)
        )
    }
}

/// Map an I/O error raised while connecting onto a transport error
#[must_use]
pub fn map_connect_io_error(err: &std::io::Error) -> TransportError {
    use std::io::ErrorKind;

    #[cfg(unix)]
    if matches!(
        err.raw_os_error(),
        Some(libc::ENETUNREACH | libc::ENETDOWN)
    ) {
        return TransportError::NetworkUnavailable(err.to_string());
    }

    match err.kind() {
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => TransportError::ConnectionLost,
        _ => TransportError::ConnectionFailed(err.to_string()),
    }
}

/// An outbound message plus the channel that reports whether it was written
#[derive(Debug)]
pub struct OutboundFrame {
    /// Message to transmit
    pub message: AgentMessage,
    /// Completion signal from the writer task
    pub ack: oneshot::Sender<Result<(), TransportError>>,
}

/// Inbound frame: a decoded message or a per-frame decode failure
pub type InboundFrame = Result<AgentMessage, TransportError>;

/// Session side of an established connection
///
/// Dropping the link closes the connection: the writer task sees its channel
/// close and shuts the stream down.
#[derive(Debug)]
pub struct TransportLink {
    /// Frames to write to the server
    pub outbound: mpsc::Sender<OutboundFrame>,
    /// Frames read from the server; closes when the connection ends
    pub inbound: mpsc::Receiver<InboundFrame>,
}

/// Transport side of an established connection
#[derive(Debug)]
pub struct LinkPeer {
    /// Frames the session wants written
    pub outbound_rx: mpsc::Receiver<OutboundFrame>,
    /// Where to deliver frames read from the server
    pub inbound_tx: mpsc::Sender<InboundFrame>,
}

impl TransportLink {
    /// Create a connected link/peer pair
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, LinkPeer) {
        let capacity = capacity.max(1);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        (
            Self {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            LinkPeer {
                outbound_rx,
                inbound_tx,
            },
        )
    }
}

/// A way of reaching an agent server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection and complete the handshake
    ///
    /// The session bounds this call with its connect timeout and may drop the
    /// future at any point to cancel the attempt.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        config: &TransportConfig,
    ) -> Result<TransportLink, TransportError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}
