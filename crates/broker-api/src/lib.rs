//! Request/response models and framing for the privileged command broker.
//!
//! The broker daemon itself is an external service; this crate pins down the
//! narrow contract used to talk to it. A control connection carries
//! [`ControlRequest`]/[`ControlResponse`] pairs; one stream connection per
//! spawned process carries [`StreamRequest`]s up and [`StreamEvent`]s down.
//! Every message is one [`codec`] frame; binary payloads travel as base64.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod codec;

/// Protocol revision spoken by this client. The broker echoes its own in
/// [`ControlResponse::Pong`].
pub const PROTOCOL_VERSION: u32 = 1;

/// Everything the broker needs to create a process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnSpec {
    /// Program and arguments, already split; the caller decides whether
    /// this is a direct exec or an interpreter invocation.
    pub argv: Vec<String>,
    /// Working directory; broker default when absent.
    pub cwd: Option<String>,
    /// Extra environment entries layered over the broker's own.
    pub env: HashMap<String, String>,
    /// Fire-and-forget: close the child's stdio immediately and do not
    /// track its exit.
    pub detach: bool,
}

impl SpawnSpec {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            cwd: None,
            env: HashMap::new(),
            detach: false,
        }
    }

    pub fn detached(argv: Vec<String>) -> Self {
        Self {
            detach: true,
            ..Self::new(argv)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Liveness probe; also reports the broker's identity.
    Ping,
    Spawn { spec: SpawnSpec },
    Kill { id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlResponse {
    Pong { uid: u32, version: u32 },
    Spawned { id: String },
    Killed { id: String },
    Error { message: String },
}

/// Requests on a per-process stream connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StreamRequest {
    /// Bind this connection to a spawned process's stdio.
    Attach { id: String },
    Stdin { data_b64: String },
    CloseStdin,
}

/// Events on a per-process stream connection, in arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    Stdout { data_b64: String },
    Stderr { data_b64: String },
    /// Terminal event: the process exited with this code.
    Exited { code: i32 },
    /// The broker's read of the process pipe failed; interrupted reads are
    /// transient and worth retrying, anything else is not.
    Error { message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("interrupted stream read")]
    Interrupted,
    #[error("broker reported: {0}")]
    Service(String),
}

impl BrokerError {
    /// Whether the operation that produced this error is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Classify an error message reported by the broker mid-stream.
    pub fn from_service_message(message: &str) -> Self {
        if message.to_ascii_lowercase().contains("interrupted") {
            Self::Interrupted
        } else {
            Self::Service(message.to_string())
        }
    }
}

/// Encode a binary payload for the wire.
pub fn encode_payload(data: &[u8]) -> String {
    BASE64_STANDARD.encode(data)
}

/// Decode a payload field; malformed base64 is a protocol error.
pub fn decode_payload(data_b64: &str) -> Result<Vec<u8>, BrokerError> {
    BASE64_STANDARD
        .decode(data_b64)
        .map_err(|err| BrokerError::Protocol(format!("invalid base64 payload: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_request_wire_shape() {
        let json = serde_json::to_value(&ControlRequest::Ping).unwrap();
        assert_eq!(json, serde_json::json!({"op": "ping"}));

        let json = serde_json::to_value(&ControlRequest::Kill {
            id: "prc_1".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"op": "kill", "id": "prc_1"}));
    }

    #[test]
    fn test_stream_event_wire_shape() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"event":"exited","code":3}"#).unwrap();
        assert!(matches!(event, StreamEvent::Exited { code: 3 }));
    }

    #[test]
    fn test_payload_round_trip() {
        let data = b"hello \xff world";
        let encoded = encode_payload(data);
        assert_eq!(decode_payload(&encoded).unwrap(), data);
    }

    #[test]
    fn test_malformed_payload_is_protocol_error() {
        let err = decode_payload("not-base64!").unwrap_err();
        assert!(matches!(err, BrokerError::Protocol(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(BrokerError::Interrupted.is_transient());
        assert!(BrokerError::from_service_message("read interrupted by transport").is_transient());
        assert!(!BrokerError::from_service_message("permission denied").is_transient());
        assert!(!BrokerError::Protocol("bad frame".to_string()).is_transient());
    }

    #[test]
    fn test_spawn_spec_detached() {
        let spec = SpawnSpec::detached(vec!["sleep".to_string(), "30".to_string()]);
        assert!(spec.detach);
        assert!(spec.env.is_empty());
        assert!(spec.cwd.is_none());
    }
}
