//! Gateway protocol: JSON messages between clients and the server

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A call from a client, over the socket or REST
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    /// Set by clients that pipeline requests
    #[serde(default)]
    pub id: Option<String>,
}

/// The answer to one request; exactly one of `result` and `error` is set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// Same as the request's id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<GatewayError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayError {
    pub code: i32,
    pub message: String,
}

/// Pushed to every connected client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub event: String,
    pub data: Value,
}

/// Parameters of `message.send` and `POST /api/messages`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendMessageParams {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Method names accepted by the gateway
pub mod methods {
    pub const MESSAGE_SEND: &str = "message.send";
    pub const SESSION_LIST: &str = "session.list";
    pub const SESSION_NEW: &str = "session.new";
    pub const SESSION_HISTORY: &str = "session.history";
    pub const STATUS_GET: &str = "status.get";
}

/// Event names pushed to clients
pub mod events {
    /// An agent replied in a session
    pub const MESSAGE_RECEIVED: &str = "message.received";
    /// Triage picked an agent for a session's latest message
    pub const MESSAGE_ROUTED: &str = "message.routed";
    pub const TYPING_START: &str = "typing.start";
    pub const TYPING_STOP: &str = "typing.stop";
    pub const SESSION_CREATED: &str = "session.created";
}

// JSON-RPC style error codes

pub const ERR_INVALID_METHOD: i32 = -32601;
pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_INTERNAL: i32 = -32603;
pub const ERR_UNAUTHORIZED: i32 = -32000;

impl GatewayResponse {
    pub fn ok(id: Option<String>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Option<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(GatewayError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn from_result(id: Option<String>, result: Result<Value, GatewayError>) -> Self {
        match result {
            Ok(value) => Self::ok(id, value),
            Err(error) => Self {
                id,
                result: None,
                error: Some(error),
            },
        }
    }
}

impl GatewayError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ERR_INVALID_PARAMS, message)
    }
}

impl GatewayEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}
