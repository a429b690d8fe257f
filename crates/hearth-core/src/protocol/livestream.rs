//! Livestream control frames sent from the relay to each subscriber.
//!
//! Media travels as raw binary frames on the same socket.

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    StreamStarted {
        #[serde(rename = "cameraId")]
        camera_id: String,
    },
    Codec {
        codec: String,
    },
    /// Also used by the hub relay to report a failure before closing.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
    },
}

impl ControlFrame {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            code: None,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn stream_started_uses_camel_case_id() {
        let frame = ControlFrame::StreamStarted {
            camera_id: "cam-1".into(),
        };
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "stream_started", "cameraId": "cam-1"}));
    }

    #[test]
    fn plain_error_omits_code() {
        let value: Value =
            serde_json::from_str(&ControlFrame::error("boom").encode().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "error", "message": "boom"}));
    }
}
