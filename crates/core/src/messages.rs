//! WebSocket message type constants and the client envelope.
//!
//! The browser client switches on `type` and prints `message` or `data`.

use serde::{Deserialize, Serialize};

/// Informational notice (connection established, waiting, closing).
pub const MSG_TYPE_STATUS: &str = "status";

/// Intermediate progress while a job is being processed.
pub const MSG_TYPE_PROGRESS: &str = "progress";

/// Final job result document.
pub const MSG_TYPE_RESULT: &str = "result";

/// Client-visible error (failed job, unknown task, bad frame).
pub const MSG_TYPE_ERROR: &str = "error";

/// Message relayed from another connection.
pub const MSG_TYPE_BROADCAST: &str = "broadcast";

/// Control command on a stream connection.
pub const MSG_TYPE_CONTROL: &str = "control";

/// JSON envelope sent to WebSocket clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ClientMessage {
    pub fn status(message: impl Into<String>) -> Self {
        Self {
            kind: MSG_TYPE_STATUS.to_string(),
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: MSG_TYPE_ERROR.to_string(),
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn result(data: serde_json::Value) -> Self {
        Self {
            kind: MSG_TYPE_RESULT.to_string(),
            message: None,
            data: Some(data),
        }
    }

    pub fn broadcast(from: &str, message: impl Into<String>) -> Self {
        Self {
            kind: MSG_TYPE_BROADCAST.to_string(),
            message: Some(message.into()),
            data: Some(serde_json::json!({ "from": from })),
        }
    }

    /// Serialize to the JSON text sent over the wire.
    pub fn to_json(&self) -> String {
        // Serializing a struct of strings and a `Value` cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
