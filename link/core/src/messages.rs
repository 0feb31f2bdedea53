//! Agent Messages
//!
//! Messages exchanged with the remote agent server. Every message, whether typed
//! locally or received from the server, becomes an [`AgentMessage`] and is
//! appended to the session history. Messages are immutable once created.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique message identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new random message ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("msg_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a message represents on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Free-form conversational text
    #[default]
    Message,
    /// A command for the agent (e.g. `/status`)
    Command,
    /// The agent's reply to a message or command
    Response,
    /// An error reported by the agent
    Error,
    /// Status or progress notification
    Status,
}

impl MessageKind {
    /// Wire tag for this kind
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Command => "command",
            Self::Response => "response",
            Self::Error => "error",
            Self::Status => "status",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in the session history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Unique message ID
    pub id: MessageId,
    /// Message text
    pub content: String,
    /// Whether this client produced the message
    pub originated_locally: bool,
    /// Message kind
    pub kind: MessageKind,
    /// When the message was created
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    /// Create a message authored by this client
    pub fn outbound(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            content: content.into(),
            originated_locally: true,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Create a message received from the server
    pub fn inbound(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            content: content.into(),
            originated_locally: false,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Plain outbound text message
    pub fn text(content: impl Into<String>) -> Self {
        Self::outbound(MessageKind::Message, content)
    }

    /// Outbound command
    pub fn command(content: impl Into<String>) -> Self {
        Self::outbound(MessageKind::Command, content)
    }
}
