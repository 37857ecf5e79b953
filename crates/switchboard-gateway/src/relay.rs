//! Relay agent: carries agent replies back to sessions and connected clients

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use switchboard_channels::{
    Agent, BusError, Channel, HandlerContext, Message, MessageHandler, kinds,
};
use tracing::{debug, warn};

use crate::events::EventBus;
use crate::protocol::events;
use crate::server::GatewayState;
use crate::session::SessionManager;

pub const RELAY_AGENT: &str = "Gateway";

struct ReplyHandler {
    sessions: Arc<SessionManager>,
    events: EventBus,
}

#[async_trait]
impl MessageHandler for ReplyHandler {
    async fn handle(&self, msg: Message, _ctx: HandlerContext) -> Result<()> {
        let agent = msg.payload_str("agent").unwrap_or("Agent");
        let Some(content) = msg.payload_str("content") else {
            warn!("Reply {} from {} has no content, not relayed", msg.id, agent);
            return Ok(());
        };
        let session_id = msg.payload_str("session_id");

        if let Some(session_id) = session_id {
            if self.sessions.append(session_id, agent, content).await.is_none() {
                warn!("Reply from {} for unknown session '{}'", agent, session_id);
            }
            self.events.emit(
                events::TYPING_STOP,
                serde_json::json!({ "session_id": session_id }),
            );
        }

        let clients = self.events.emit(
            events::MESSAGE_RECEIVED,
            serde_json::json!({
                "session_id": session_id,
                "agent": agent,
                "content": content,
                "role": "assistant",
            }),
        );
        debug!("Relayed reply from {} to {} client(s)", agent, clients);
        Ok(())
    }
}

struct RoutedHandler {
    events: EventBus,
}

#[async_trait]
impl MessageHandler for RoutedHandler {
    async fn handle(&self, msg: Message, _ctx: HandlerContext) -> Result<()> {
        self.events.emit(
            events::MESSAGE_ROUTED,
            serde_json::json!({
                "session_id": msg.payload_str("session_id"),
                "target": msg.target,
            }),
        );
        Ok(())
    }
}

/// Build the relay agent for a gateway: replies on the human channel are
/// appended to their session and broadcast, and routing decisions on
/// `agents` are broadcast as `message.routed`
pub fn relay_agent(state: &GatewayState, agents: &Channel) -> Result<Agent, BusError> {
    let mut agent = Agent::new(RELAY_AGENT);
    agent.on(
        &state.human,
        kinds::AGENT_MESSAGE,
        Arc::new(ReplyHandler {
            sessions: state.sessions.clone(),
            events: state.events.clone(),
        }),
    )?;
    agent.on(
        agents,
        kinds::ROUTED_MESSAGE,
        Arc::new(RoutedHandler {
            events: state.events.clone(),
        }),
    )?;
    Ok(agent)
}
