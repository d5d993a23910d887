//! Socket frame envelope.
//!
//! Every frame on the socket is one JSON object:
//!
//! ```text
//! { "type": "message", "session_id": "...", "message_id": "...",
//!   "content": "...", "metadata": {...}, "timestamp": "2024-01-01T00:00:00+00:00" }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Error codes carried in `metadata.code` of `error` frames
pub mod error_code {
    pub const AUTHENTICATION: &str = "authentication_error";
    pub const VALIDATION: &str = "validation_error";
    pub const RATE_LIMIT: &str = "rate_limit";
    pub const SESSION: &str = "session_error";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    Message,
    Typing,
    Status,
    Error,
    Presence,
    Ack,
    Heartbeat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub r#type: FrameType,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub timestamp: String,
}

impl Frame {
    pub fn new(r#type: FrameType, session_id: impl Into<String>, timestamp: String) -> Self {
        Self {
            r#type,
            session_id: session_id.into(),
            message_id: None,
            content: None,
            metadata: None,
            timestamp,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    /// Acknowledgment of a received frame
    pub fn ack(session_id: impl Into<String>, message_id: impl Into<String>, timestamp: String) -> Self {
        Self::new(FrameType::Ack, session_id, timestamp).with_message_id(message_id)
    }

    /// In-band error reply; the connection stays open
    pub fn error(
        session_id: impl Into<String>,
        code: &str,
        message: impl Into<String>,
        timestamp: String,
    ) -> Self {
        Self::new(FrameType::Error, session_id, timestamp)
            .with_content(message)
            .with_meta("code", code)
    }

    /// Only server-originated chat content is tracked for acknowledgment
    pub fn requires_ack(&self) -> bool {
        self.r#type == FrameType::Message && self.message_id.is_some()
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }

    pub fn meta_bool(&self, key: &str) -> Option<bool> {
        self.metadata.as_ref()?.get(key)?.as_bool()
    }

    pub fn meta_u64(&self, key: &str) -> Option<u64> {
        self.metadata.as_ref()?.get(key)?.as_u64()
    }
}
