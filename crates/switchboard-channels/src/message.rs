//! Message envelope carried by every channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known values of the `type` discriminator
pub mod kinds {
    /// A chat message typed by a human, published on the human channel
    pub const USER_MESSAGE: &str = "user_message";
    /// A user message after triage, published on the agents channel with a `target`
    pub const ROUTED_MESSAGE: &str = "routed_message";
    /// A reply written by an agent, published back on the human channel
    pub const AGENT_MESSAGE: &str = "agent_message";
}

/// A message published on a channel.
///
/// The payload is an opaque JSON object; `kind` (serialized as `type`) is the
/// discriminator that subscription filters dispatch on. Messages are cloned
/// into each subscriber and never mutated after publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "new_message_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Message {
    /// Create a message of the given kind with a fresh id
    pub fn new(kind: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            id: new_message_id(),
            kind: kind.into(),
            target: None,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// A `user_message` carrying a chat transcript
    pub fn user(chat_messages: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert(
            "chat_messages".to_string(),
            Value::String(chat_messages.into()),
        );
        Self::new(kinds::USER_MESSAGE, payload)
    }

    /// A `routed_message` addressed to `target`
    pub fn routed(target: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self::new(kinds::ROUTED_MESSAGE, payload).with_target(target)
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Insert or replace a payload field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Read a string field from the payload
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }
}
