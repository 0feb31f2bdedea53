//! Connection Profile
//!
//! A named, persisted network endpoint. Profiles are identified by their
//! `(host, port)` pair; everything else is metadata that may change between
//! saves of the same endpoint.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transport::config::Endpoint;

/// Path used when a pairing payload or caller does not specify one
pub const DEFAULT_PATH: &str = "/ws";

/// Identity of a profile in the store
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileKey {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
}

impl ProfileKey {
    /// Create a key
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A saved server endpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
    /// WebSocket path on the server
    pub path: String,
    /// Human-readable server name
    #[serde(default)]
    pub display_label: Option<String>,
    /// Network the server was advertised on (e.g. Wi-Fi SSID)
    #[serde(default)]
    pub network: Option<String>,
    /// Last time this profile was saved, selected or connected
    pub last_connected_at: DateTime<Utc>,
}

impl ConnectionProfile {
    /// Create a profile with the default path and no metadata
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: DEFAULT_PATH.to_string(),
            display_label: None,
            network: None,
            last_connected_at: Utc::now(),
        }
    }

    /// Set the server path
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = normalize_path(&path.into());
        self
    }

    /// Set the display label
    #[must_use]
    pub fn with_display_label(mut self, label: impl Into<String>) -> Self {
        self.display_label = Some(label.into());
        self
    }

    /// Set the network name
    #[must_use]
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// Identity key of this profile
    #[must_use]
    pub fn key(&self) -> ProfileKey {
        ProfileKey::new(self.host.clone(), self.port)
    }

    /// Whether both profiles describe the same endpoint
    #[must_use]
    pub fn same_endpoint(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }

    /// Refresh `last_connected_at` to now
    pub fn touch(&mut self) {
        self.last_connected_at = Utc::now();
    }

    /// Display label, falling back to `host:port`
    #[must_use]
    pub fn label(&self) -> String {
        self.display_label
            .clone()
            .unwrap_or_else(|| self.key().to_string())
    }

    /// Transport-ready endpoint for this profile
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port, self.path.clone())
    }
}

/// Ensure a server path starts with `/`, defaulting empty paths
pub(crate) fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        DEFAULT_PATH.to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
