//! Pairing Codec
//!
//! Turns a pairing payload (usually scanned from a QR code shown by the agent
//! server) into a validated [`ConnectionProfile`].
//!
//! # Payload Format
//!
//! ```json
//! {
//!   "leanvibe": {
//!     "server": { "host": "10.0.0.5", "port": 8000, "path": "/ws" },
//!     "metadata": { "serverName": "Lab Mac", "network": "office-wifi" }
//!   }
//! }
//! ```
//!
//! The `leanvibe` wrapper is optional. `websocket_path` is accepted as an alias
//! for `path`, and the label/network may also appear inside `server`.
//!
//! Decoding never yields a partial profile: either every required field is
//! present and valid, or a [`DecodeError`] is returned.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::profiles::profile::{normalize_path, ConnectionProfile, DEFAULT_PATH};

/// Root key used by agent servers when generating pairing codes
pub const PAYLOAD_ROOT: &str = "leanvibe";

/// Payload format version written by [`PairingCodec::encode`]
pub const PAYLOAD_VERSION: &str = "1.0";

/// Errors from decoding a pairing payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Payload is not well-formed structured data, or a field has the wrong shape
    #[error("Pairing payload is malformed: {0}")]
    Malformed(String),

    /// Payload parsed but required fields are absent
    #[error("Pairing payload is missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),
}

/// Pairing payload encoder/decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct PairingCodec;

impl PairingCodec {
    /// Decode a pairing payload into a profile stamped with the current time
    ///
    /// # Errors
    ///
    /// - [`DecodeError::Malformed`] if the bytes are not a JSON object or a
    ///   field has the wrong type/range
    /// - [`DecodeError::MissingFields`] if the host or port is absent
    pub fn decode(payload: &[u8]) -> Result<ConnectionProfile, DecodeError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| DecodeError::Malformed(format!("not valid JSON: {e}")))?;

        let root = value
            .as_object()
            .ok_or_else(|| DecodeError::Malformed("root is not an object".to_string()))?;

        let root = match root.get(PAYLOAD_ROOT) {
            None => root,
            Some(Value::Null) => return Err(missing_server()),
            Some(inner) => inner.as_object().ok_or_else(|| {
                DecodeError::Malformed(format!("`{PAYLOAD_ROOT}` is not an object"))
            })?,
        };

        let server = match root.get("server") {
            None | Some(Value::Null) => return Err(missing_server()),
            Some(server) => server
                .as_object()
                .ok_or_else(|| DecodeError::Malformed("`server` is not an object".to_string()))?,
        };

        let metadata = match root.get("metadata") {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map),
            Some(_) => {
                return Err(DecodeError::Malformed(
                    "`metadata` is not an object".to_string(),
                ))
            }
        };

        let host = optional_string(server, "host")?
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty());
        let port = port_field(server)?;

        let (host, port) = match (host, port) {
            (Some(host), Some(port)) => (host, port),
            (host, port) => {
                let mut missing = Vec::new();
                if host.is_none() {
                    missing.push("server.host".to_string());
                }
                if port.is_none() {
                    missing.push("server.port".to_string());
                }
                return Err(DecodeError::MissingFields(missing));
            }
        };

        let path = match optional_string(server, "path")? {
            Some(path) => Some(path),
            None => optional_string(server, "websocket_path")?,
        }
        .map_or_else(|| DEFAULT_PATH.to_string(), |p| normalize_path(&p));

        let mut label = None;
        let mut network = None;
        if let Some(meta) = metadata {
            label = first_string(meta, &["serverName", "server_name"])?;
            network = optional_string(meta, "network")?;
        }
        if label.is_none() {
            label = optional_string(server, "name")?;
        }
        if network.is_none() {
            network = optional_string(server, "network")?;
        }

        let mut profile = ConnectionProfile::new(host, port).with_path(path);
        profile.display_label = non_blank(label.as_deref());
        profile.network = non_blank(network.as_deref());

        tracing::debug!(profile = %profile.key(), "Decoded pairing payload");
        Ok(profile)
    }

    /// Encode a profile as a canonical pairing payload
    ///
    /// Fields are written in the form `decode` produces: host and labels are
    /// trimmed, blank labels are left out and the path is normalized. Decoding
    /// the result therefore gives back the same endpoint and metadata.
    #[must_use]
    pub fn encode(profile: &ConnectionProfile) -> Vec<u8> {
        let mut metadata = Map::new();
        if let Some(label) = non_blank(profile.display_label.as_deref()) {
            metadata.insert("serverName".to_string(), Value::String(label));
        }
        if let Some(network) = non_blank(profile.network.as_deref()) {
            metadata.insert("network".to_string(), Value::String(network));
        }

        let payload = serde_json::json!({
            PAYLOAD_ROOT: {
                "version": PAYLOAD_VERSION,
                "server": {
                    "host": profile.host.trim(),
                    "port": profile.port,
                    "path": normalize_path(&profile.path),
                },
                "metadata": Value::Object(metadata),
            }
        });

        payload.to_string().into_bytes()
    }
}

fn missing_server() -> DecodeError {
    DecodeError::MissingFields(vec!["server.host".to_string(), "server.port".to_string()])
}

/// Trimmed text, or `None` when blank
fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn optional_string(map: &Map<String, Value>, key: &str) -> Result<Option<String>, DecodeError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(DecodeError::Malformed(format!(
            "`{key}` must be a string, got {other}"
        ))),
    }
}

fn first_string(map: &Map<String, Value>, keys: &[&str]) -> Result<Option<String>, DecodeError> {
    for key in keys {
        if let Some(value) = optional_string(map, key)? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

fn port_field(server: &Map<String, Value>) -> Result<Option<u16>, DecodeError> {
    match server.get("port") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p != 0)
            .map(Some)
            .ok_or_else(|| DecodeError::Malformed(format!("port {n} is out of range"))),
        Some(other) => Err(DecodeError::Malformed(format!(
            "`port` must be an integer, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_minimal_wrapped_payload() {
        let payload = br#"{"leanvibe":{"server":{"host":"10.0.0.5","port":8000}}}"#;
        let profile = PairingCodec::decode(payload).unwrap();

        assert_eq!(profile.host, "10.0.0.5");
        assert_eq!(profile.port, 8000);
        assert_eq!(profile.path, "/ws");
        assert!(profile.display_label.is_none());
        assert!(profile.network.is_none());
    }

    #[test]
    fn test_decode_full_payload() {
        let payload = br#"{
            "leanvibe": {
                "version": "1.0",
                "server": {"host": " lab.local ", "port": 9001, "websocket_path": "agent"},
                "metadata": {"server_name": "Lab Mac", "network": "office"}
            }
        }"#;
        let profile = PairingCodec::decode(payload).unwrap();

        assert_eq!(profile.host, "lab.local");
        assert_eq!(profile.path, "/agent");
        assert_eq!(profile.display_label.as_deref(), Some("Lab Mac"));
        assert_eq!(profile.network.as_deref(), Some("office"));
    }

    #[test]
    fn test_decode_bare_root() {
        let payload = br#"{"server":{"host":"h","port":1,"name":"Box","network":"n"}}"#;
        let profile = PairingCodec::decode(payload).unwrap();
        assert_eq!(profile.display_label.as_deref(), Some("Box"));
        assert_eq!(profile.network.as_deref(), Some("n"));
    }

    #[test]
    fn test_decode_not_json() {
        let err = PairingCodec::decode(b"WIFI:S:network;;").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_decode_non_object_root() {
        assert!(matches!(
            PairingCodec::decode(b"[1,2,3]"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            PairingCodec::decode(br#"{"leanvibe": 5}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_missing_fields() {
        let err = PairingCodec::decode(br#"{"leanvibe":{"server":{"port":8000}}}"#).unwrap_err();
        assert_eq!(err, DecodeError::MissingFields(vec!["server.host".into()]));

        let err = PairingCodec::decode(br#"{"leanvibe":{"server":{"host":"h"}}}"#).unwrap_err();
        assert_eq!(err, DecodeError::MissingFields(vec!["server.port".into()]));

        let err = PairingCodec::decode(br#"{"leanvibe":{}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingFields(ref f) if f.len() == 2));

        let err = PairingCodec::decode(br#"{"server":{"host":"  ","port":1}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingFields(_)));
    }

    #[test]
    fn test_decode_invalid_port() {
        for payload in [
            br#"{"server":{"host":"h","port":0}}"#.as_slice(),
            br#"{"server":{"host":"h","port":70000}}"#.as_slice(),
            br#"{"server":{"host":"h","port":-1}}"#.as_slice(),
            br#"{"server":{"host":"h","port":"8000"}}"#.as_slice(),
        ] {
            assert!(matches!(
                PairingCodec::decode(payload),
                Err(DecodeError::Malformed(_))
            ));
        }
    }

    #[test]
    fn test_decode_wrong_field_type() {
        let err = PairingCodec::decode(br#"{"server":{"host":42,"port":1}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let original = ConnectionProfile::new("192.168.1.20", 8765)
            .with_path("/agent/ws")
            .with_display_label("Studio")
            .with_network("home");

        let decoded = PairingCodec::decode(&PairingCodec::encode(&original)).unwrap();

        assert_eq!(decoded.host, original.host);
        assert_eq!(decoded.port, original.port);
        assert_eq!(decoded.path, original.path);
        assert_eq!(decoded.display_label, original.display_label);
        assert_eq!(decoded.network, original.network);
    }

    #[test]
    fn test_roundtrip_generated_profiles() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        const HOSTS: [&str; 5] = ["10.0.0.5", " lab.local ", "::1", "studio-mac", "h"];
        const PATHS: [&str; 5] = ["/ws", "agent", "", "  /a/b  ", "/"];
        const TEXTS: [&str; 7] = ["", "   ", "Lab Mac", " padded ", "Café ☕", "say \"hi\"", "a\\b"];

        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let mut profile = ConnectionProfile::new(
                HOSTS[rng.gen_range(0..HOSTS.len())],
                rng.gen_range(1..=u16::MAX),
            );
            profile.path = PATHS[rng.gen_range(0..PATHS.len())].to_string();
            if rng.gen_bool(0.7) {
                profile.display_label = Some(TEXTS[rng.gen_range(0..TEXTS.len())].to_string());
            }
            if rng.gen_bool(0.7) {
                profile.network = Some(TEXTS[rng.gen_range(0..TEXTS.len())].to_string());
            }

            let decoded = PairingCodec::decode(&PairingCodec::encode(&profile)).unwrap();

            assert_eq!(decoded.host, profile.host.trim());
            assert_eq!(decoded.port, profile.port);
            assert_eq!(decoded.path, normalize_path(&profile.path));
            assert_eq!(decoded.display_label, non_blank(profile.display_label.as_deref()));
            assert_eq!(decoded.network, non_blank(profile.network.as_deref()));

            // A second pass is stable
            let again = PairingCodec::decode(&PairingCodec::encode(&decoded)).unwrap();
            assert_eq!(again.key(), decoded.key());
            assert_eq!(again.path, decoded.path);
            assert_eq!(again.display_label, decoded.display_label);
            assert_eq!(again.network, decoded.network);
        }
    }

    #[test]
    fn test_blank_labels_are_dropped() {
        let mut profile = ConnectionProfile::new("h", 1)
            .with_display_label("  ")
            .with_network("");
        let decoded = PairingCodec::decode(&PairingCodec::encode(&profile)).unwrap();
        assert!(decoded.display_label.is_none());
        assert!(decoded.network.is_none());

        profile.display_label = Some(" Lab ".into());
        let decoded = PairingCodec::decode(&PairingCodec::encode(&profile)).unwrap();
        assert_eq!(decoded.display_label.as_deref(), Some("Lab"));
    }

    #[test]
    fn test_null_wrapper_and_null_server_agree() {
        let both = DecodeError::MissingFields(vec!["server.host".into(), "server.port".into()]);
        assert_eq!(PairingCodec::decode(br#"{"leanvibe":null}"#).unwrap_err(), both);
        assert_eq!(PairingCodec::decode(br#"{"server":null}"#).unwrap_err(), both);
        assert_eq!(
            PairingCodec::decode(br#"{"leanvibe":{"server":null}}"#).unwrap_err(),
            both
        );
    }

    #[test]
    fn test_error_display_lists_fields() {
        let err = DecodeError::MissingFields(vec!["server.host".into(), "server.port".into()]);
        assert_eq!(
            err.to_string(),
            "Pairing payload is missing required fields: server.host, server.port"
        );
    }
}
