//! Wire Envelope
//!
//! Each [`AgentMessage`] travels as one JSON text frame:
//!
//! ```text
//! {"type":"message","content":"hello","timestamp":"2025-01-01T00:00:00Z","id":"msg_…"}
//! ```
//!
//! Servers are not required to send `timestamp` or `id`; missing values are
//! filled in on receipt. The `type` tag is mandatory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TransportError;
use crate::messages::{AgentMessage, MessageId, MessageKind};

/// Maximum accepted frame size (1 MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: MessageKind,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

/// Encode an outbound message as a text frame
///
/// # Errors
///
/// Returns `TransportError::Serialization` if the frame exceeds `MAX_FRAME_SIZE`.
pub fn encode(message: &AgentMessage) -> Result<String, TransportError> {
    let envelope = Envelope {
        kind: message.kind,
        content: message.content.clone(),
        timestamp: Some(message.timestamp),
        id: Some(message.id.0.clone()),
    };

    let text =
        serde_json::to_string(&envelope).map_err(|e| TransportError::Serialization(e.to_string()))?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(TransportError::Serialization(format!(
            "Frame too large: {} bytes (max: {MAX_FRAME_SIZE})",
            text.len()
        )));
    }
    Ok(text)
}

/// Decode an inbound text frame into a server-originated message
///
/// # Errors
///
/// Returns `TransportError::Serialization` for oversized or invalid frames.
pub fn decode(text: &str) -> Result<AgentMessage, TransportError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(TransportError::Serialization(format!(
            "Frame size {} exceeds maximum {MAX_FRAME_SIZE}",
            text.len()
        )));
    }

    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| TransportError::Serialization(e.to_string()))?;

    Ok(AgentMessage {
        id: envelope.id.map_or_else(MessageId::new, MessageId),
        content: envelope.content,
        originated_locally: false,
        kind: envelope.kind,
        timestamp: envelope.timestamp.unwrap_or_else(Utc::now),
    })
}
