//! Transport Configuration
//!
//! Timeouts and channel sizing for transport sessions, plus the [`Endpoint`]
//! a session connects to.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default handshake timeout
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Transport-ready description of where to connect
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
    /// WebSocket path, always starting with `/`
    pub path: String,
}

impl Endpoint {
    /// Create an endpoint
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
        }
    }

    /// `ws://` URL for this endpoint
    ///
    /// IPv6 literals are bracketed.
    #[must_use]
    pub fn url(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("ws://[{}]:{}{}", self.host, self.port, self.path)
        } else {
            format!("ws://{}:{}{}", self.host, self.port, self.path)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Transport configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// How long `connect` waits for the handshake to complete
    pub connect_timeout_ms: u64,

    /// How long `send` waits for a frame to be written
    pub send_timeout_ms: u64,

    /// Capacity of the inbound/outbound link channels
    pub channel_capacity: usize,

    /// Interval between keepalive pings in seconds (0 = disabled)
    pub keepalive_interval_secs: u64,

    /// Silence from the server after which the link is considered dead (0 = never)
    pub keepalive_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            send_timeout_ms: 5000,
            channel_capacity: 100,
            keepalive_interval_secs: 30,
            keepalive_timeout_secs: 90,
        }
    }
}

impl TransportConfig {
    /// Handshake timeout
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Transmit timeout
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Keepalive ping interval, `None` when disabled
    #[must_use]
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_secs > 0).then(|| Duration::from_secs(self.keepalive_interval_secs))
    }

    /// Idle limit before the link is dropped, `None` when disabled
    #[must_use]
    pub fn keepalive_timeout(&self) -> Option<Duration> {
        (self.keepalive_timeout_secs > 0).then(|| Duration::from_secs(self.keepalive_timeout_secs))
    }
}
