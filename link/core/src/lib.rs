//! Agent Link Core - Resilient Connection Layer for agent-link clients
//!
//! This crate holds everything a client needs to pair with an agent server,
//! keep a WebSocket session to it alive, and recover when things go wrong.
//! It has no UI dependencies; the `agent-link` CLI is one thin surface over it.
//!
//! # Architecture
//!
//! ```text
//!  pairing payload (QR / file)
//!            │
//!            ▼
//!     ┌─────────────┐  save / current   ┌─────────────────────────┐
//!     │PairingCodec │ ────────────────► │ ConnectionProfileStore  │
//!     └─────────────┘                   └────────────┬────────────┘
//!                                                    │ profile
//!                                                    ▼
//!  ┌────────────────────┐   connect/send  ┌──────────────────────┐
//!  │ RecoveryOrchestrator│ ─────────────► │   TransportSession   │ ◄──► Transport
//!  │   + RetryEngine    │                 └──────────┬───────────┘     (WebSocket)
//!  └─────────▲──────────┘                            │ ClassifiedError
//!            │ classified errors                     ▼
//!  ┌─────────┴──────────┐  service status ┌──────────────────────┐
//!  │ServiceHealthRegistry│ ─────────────► │ GlobalErrorRegistry  │
//!  └────────────────────┘                 └──────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`LinkContext`]: Owns the single instance of every shared component
//! - [`TransportSession`]: Connection state machine and message history
//! - [`ConnectionProfileStore`]: Saved endpoints, most recently used first
//! - [`PairingCodec`]: Pairing payload decoding
//! - [`RetryEngine`]: Bounded retries with exponential backoff
//! - [`ErrorClassifier`] / [`GlobalErrorRegistry`]: Error classification and display state
//! - [`ServiceHealthRegistry`]: Health of dependent services
//! - [`RecoveryOrchestrator`]: Category-driven recovery
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use agent_link_core::{load_config, LinkContext, PairingCodec, WebSocketTransport};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let storage = LinkContext::storage_for(&config);
//!     let ctx = LinkContext::init(config, Arc::new(WebSocketTransport::new()), storage);
//!
//!     let payload = std::fs::read("pairing.json")?;
//!     ctx.session.connect_with_pairing(&payload).await?;
//!     ctx.session.send_text("hello").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`config`]: TOML configuration with env and CLI overrides
//! - [`context`]: Process context wiring components together
//! - [`errors`]: Error classification and the global error registry
//! - [`health`]: Service health registry and probes
//! - [`messages`]: Chat messages exchanged with the server
//! - [`pairing`]: Pairing payload codec
//! - [`profiles`]: Connection profiles and their persistence
//! - [`recovery`]: Recovery strategies and orchestration
//! - [`retry`]: Retry policies and the retry engine
//! - [`transport`]: Transports and the transport session

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod errors;
pub mod health;
pub mod messages;
pub mod pairing;
pub mod profiles;
pub mod recovery;
pub mod retry;
pub mod transport;

// Re-exports for convenience
pub use context::LinkContext;
pub use messages::{AgentMessage, MessageId, MessageKind};
pub use pairing::{DecodeError, PairingCodec};
pub use profiles::{
    ConnectionProfile, ConnectionProfileStore, FileProfileStorage, MemoryProfileStorage,
    ProfileKey, ProfileStorage, StoreError,
};
pub use transport::{
    Endpoint, PairingError, SessionEvent, SessionState, Transport, TransportConfig,
    TransportError, TransportSession,
};
#[cfg(feature = "websocket")]
pub use transport::WebSocketTransport;

// Error exports
pub use errors::{
    ClassifiedError, ErrorCategory, ErrorClassifier, ErrorEvent, ErrorSeverity,
    GlobalErrorRegistry,
};

// Health exports
pub use health::{
    Criticality, HealthProbe, HttpHealthProbe, ServiceConfig, ServiceError, ServiceHealthRegistry,
    ServiceStatus,
};

// Retry and recovery exports
pub use recovery::{
    RecoveryMetrics, RecoveryOrchestrator, RecoveryOutcome, RecoveryStrategy,
};
pub use retry::{Backoff, RetryConfig, RetryEngine, RetryError, RetryPolicy, RetryRecord, Retryable};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, LinkConfig,
};
