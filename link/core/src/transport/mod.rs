//! Transport Layer
//!
//! How the client reaches an agent server and keeps a session with it.
//!
//! # Architecture
//!
//! ```text
//! +------------------+     Transport::connect     +-----------------------+
//! | TransportSession | -------------------------> | WebSocketTransport    |
//! |  state machine   |                            | InMemoryTransport     |
//! |  history         | <====== TransportLink ===> |  reader/writer tasks  |
//! +------------------+   (mpsc in / mpsc out)     +-----------------------+
//! ```
//!
//! The session owns lifecycle, history and error state. Transports only
//! perform the handshake and pump frames between the socket and the link
//! channels.

pub mod config;
pub mod in_memory;
pub mod session;
pub mod traits;
#[cfg(feature = "websocket")]
pub mod websocket;
pub mod wire;

pub use config::{Endpoint, TransportConfig, DEFAULT_CONNECT_TIMEOUT_MS};
pub use in_memory::{Handshake, InMemoryServer, InMemoryTransport, ServerConnection};
pub use session::{PairingError, SessionEvent, SessionState, TransportSession};
pub use traits::{
    map_connect_io_error, InboundFrame, LinkPeer, OutboundFrame, Transport, TransportError,
    TransportLink,
};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
