//! Envelope protocol.
//!
//! Every frame on every universe connection (registry, relay, node-to-node)
//! is one JSON [`Envelope`]:
//!
//! ```json
//! {"type": "register", "from_node": "n1", "payload": {...}, "id": "...", "ts": 1718000000.5}
//! ```
//!
//! Envelopes are immutable once built. Responses reuse the request `id` so the
//! caller (or a relay) can correlate them.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Envelope payload: an arbitrary JSON object. Unknown keys are preserved.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// The closed set of envelope types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    Register,
    RegisterOk,
    Update,
    UpdateOk,
    Ping,
    Pong,
    Error,
    /// Capability-gated work request from another node.
    Task,
    TaskResult,
    /// First frame on a relay session.
    RelayHello,
    RelayHelloOk,
}

impl EnvelopeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::RegisterOk => "register_ok",
            Self::Update => "update",
            Self::UpdateOk => "update_ok",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Error => "error",
            Self::Task => "task",
            Self::TaskResult => "task_result",
            Self::RelayHello => "relay_hello",
            Self::RelayHelloOk => "relay_hello_ok",
        }
    }
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A universe protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    kind: EnvelopeType,
    #[serde(default, deserialize_with = "null_as_default")]
    from_node: String,
    #[serde(default, deserialize_with = "null_as_default")]
    payload: Payload,
    #[serde(default, deserialize_with = "null_as_default")]
    id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    ts: f64,
}

/// Treat an explicit `null` like a missing key. Peers that serialize `None`
/// send `"from_node": null` and `"payload": null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Build a new envelope with a fresh random id and the current timestamp.
pub fn make_envelope(kind: EnvelopeType, from_node: Option<&str>, payload: Option<Payload>) -> Envelope {
    Envelope {
        kind,
        from_node: from_node.unwrap_or_default().to_string(),
        payload: payload.unwrap_or_default(),
        id: uuid::Uuid::new_v4().simple().to_string(),
        ts: now_ts(),
    }
}

/// Seconds since the Unix epoch, with microsecond resolution.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeType {
        self.kind
    }

    pub fn from_node(&self) -> &str {
        &self.from_node
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ts(&self) -> f64 {
        self.ts
    }

    /// String value of a payload key, if present and a string.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }

    /// The `message` of an error payload, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.payload_str("message").filter(|m| !m.is_empty())
    }

    /// Build a response to this envelope, reusing its id.
    pub fn reply(&self, kind: EnvelopeType, from_node: &str, payload: Payload) -> Envelope {
        Envelope {
            kind,
            from_node: from_node.to_string(),
            payload,
            id: self.id.clone(),
            ts: now_ts(),
        }
    }

    /// Build an `error` response to this envelope.
    pub fn error_reply(&self, from_node: &str, code: u16, message: impl Into<String>) -> Envelope {
        error_envelope(&self.id, from_node, code, message)
    }

    /// Serialize to a JSON string.
    pub fn to_wire(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON string. A missing or unknown `type` is a [`ProtocolError`].
    pub fn from_wire(text: &str) -> Result<Envelope, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Build an `error` envelope with payload `{code, message}`.
pub fn error_envelope(id: &str, from_node: &str, code: u16, message: impl Into<String>) -> Envelope {
    let mut payload = Payload::new();
    payload.insert("code".to_string(), serde_json::json!(code));
    payload.insert("message".to_string(), serde_json::json!(message.into()));
    Envelope {
        kind: EnvelopeType::Error,
        from_node: from_node.to_string(),
        payload,
        id: id.to_string(),
        ts: now_ts(),
    }
}
