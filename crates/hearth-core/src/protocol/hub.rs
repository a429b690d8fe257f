//! Hub WebSocket protocol frames.
//!
//! The relay forwards these verbatim; only the handshake frames are inspected
//! server-side. The client library decodes everything through [`parse_frame`],
//! which follows a tolerant reader pattern: unknown fields are ignored and
//! unknown frame types come back as [`HubMessage::Unknown`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Event type carrying entity state deltas.
pub const STATE_CHANGED: &str = "state_changed";

/// A single frame of the hub protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    AuthRequired {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ha_version: Option<String>,
    },
    Auth {
        access_token: String,
    },
    AuthOk {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    Result {
        id: u64,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<HubError>,
    },
    Event {
        id: u64,
        event: HubEvent,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
    },
    /// Any frame type this library does not model.
    #[serde(skip)]
    Unknown { msg_type: String, payload: Value },
}

/// Error payload of a failed `result` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubError {
    pub code: String,
    pub message: String,
}

/// Payload of an `event` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubEvent {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

/// Latest known state of one hub entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub last_changed: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

/// `data` of a `state_changed` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChanged {
    pub entity_id: String,
    #[serde(default)]
    pub old_state: Option<EntityState>,
    /// `None` when the entity was removed.
    #[serde(default)]
    pub new_state: Option<EntityState>,
}

const KNOWN_TYPES: &[&str] = &[
    "auth_required",
    "auth",
    "auth_ok",
    "auth_invalid",
    "result",
    "event",
    "ping",
    "pong",
];

impl HubMessage {
    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String> {
        match self {
            Self::Unknown { payload, .. } => Ok(serde_json::to_string(payload)?),
            other => Ok(serde_json::to_string(other)?),
        }
    }

    /// The `type` discriminator as it appears on the wire.
    pub fn msg_type(&self) -> &str {
        match self {
            Self::AuthRequired { .. } => "auth_required",
            Self::Auth { .. } => "auth",
            Self::AuthOk { .. } => "auth_ok",
            Self::AuthInvalid { .. } => "auth_invalid",
            Self::Result { .. } => "result",
            Self::Event { .. } => "event",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::Unknown { msg_type, .. } => msg_type,
        }
    }
}

/// Parse one text frame from the hub.
pub fn parse_frame(text: &str) -> Result<HubMessage> {
    let raw: Value = serde_json::from_str(text)?;
    let msg_type = raw
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Protocol("Missing 'type' field".into()))?;

    if KNOWN_TYPES.contains(&msg_type) {
        Ok(serde_json::from_value(raw)?)
    } else {
        Ok(HubMessage::Unknown {
            msg_type: msg_type.to_string(),
            payload: raw,
        })
    }
}

/// Build an outbound command frame: `{id, type, ..payload}`.
///
/// `id` and `type` in `payload` are overwritten.
pub fn encode_command(id: u64, kind: &str, payload: &Map<String, Value>) -> Result<String> {
    let mut frame = payload.clone();
    frame.insert("id".into(), Value::from(id));
    frame.insert("type".into(), Value::from(kind));
    Ok(serde_json::to_string(&frame)?)
}
