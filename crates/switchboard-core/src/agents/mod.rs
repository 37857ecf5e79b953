//! Agents that sit on the human and agents channels
//!
//! - `TriageAgent` classifies every `user_message` and republishes it as a
//!   `routed_message` with a `target`
//! - `PolicyAgent` and `TicketingAgent` answer the routed messages addressed to them
//!
//! Every reply is an `agent_message` on the human channel.

pub mod policy;
pub mod ticketing;
pub mod triage;

use serde_json::{Map, Value};
use switchboard_channels::{BusError, Channel, Message, kinds};

pub(crate) use crate::classifier::last_user_line;

pub use policy::{POLICY_AGENT, PolicyHandler, policy_agent};
pub use ticketing::{TICKETING_AGENT, Ticket, TicketStore, TicketingHandler, ticketing_agent};
pub use triage::{RoutingPolicy, TRIAGE_AGENT, TriageHandler, triage_agent};

/// Build the `agent_message` an agent sends back to the human channel.
///
/// The session id of `source` is carried over so the reply can be matched to
/// the conversation it answers.
pub fn reply_to(source: &Message, agent: &str, content: impl Into<String>) -> Message {
    let mut payload = Map::new();
    payload.insert("agent".to_string(), Value::String(agent.to_string()));
    payload.insert("content".to_string(), Value::String(content.into()));
    if let Some(session_id) = source.payload.get("session_id") {
        payload.insert("session_id".to_string(), session_id.clone());
    }
    Message::new(kinds::AGENT_MESSAGE, payload)
}

pub(crate) fn publish_reply(
    human: &Channel,
    source: &Message,
    agent: &str,
    content: impl Into<String>,
) -> Result<usize, BusError> {
    human.publish(reply_to(source, agent, content))
}

/// The transcript a message carries; missing means empty
pub(crate) fn chat_messages(msg: &Message) -> &str {
    msg.payload_str("chat_messages").unwrap_or("")
}
