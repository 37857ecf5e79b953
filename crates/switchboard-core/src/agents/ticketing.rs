//! Ticketing agent: opens support tickets for unresolved insurance issues

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use switchboard_channels::{Agent, BusError, Channel, Filter, HandlerContext, Message, MessageHandler};
use tracing::info;

use super::{chat_messages, last_user_line, publish_reply};

pub const TICKETING_AGENT: &str = "TicketingAgent";

#[derive(Debug, Clone, Serialize)]
pub struct Ticket {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

/// In-memory ticket store shared by clones
#[derive(Debug, Clone, Default)]
pub struct TicketStore {
    tickets: Arc<DashMap<String, Ticket>>,
}

impl TicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, summary: impl Into<String>, session_id: Option<String>) -> Ticket {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        let ticket = Ticket {
            id: format!("TICKET-{}", uuid[..8].to_uppercase()),
            session_id,
            summary: summary.into(),
            created_at: Utc::now(),
        };
        self.tickets.insert(ticket.id.clone(), ticket.clone());
        ticket
    }

    pub fn get(&self, id: &str) -> Option<Ticket> {
        self.tickets.get(id).map(|t| t.value().clone())
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// All tickets, oldest first
    pub fn list(&self) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self.tickets.iter().map(|t| t.value().clone()).collect();
        tickets.sort_by_key(|t| t.created_at);
        tickets
    }
}

pub struct TicketingHandler {
    store: TicketStore,
    human: Channel,
}

impl TicketingHandler {
    pub fn new(store: TicketStore, human: Channel) -> Self {
        Self { store, human }
    }
}

#[async_trait]
impl MessageHandler for TicketingHandler {
    async fn handle(&self, msg: Message, _ctx: HandlerContext) -> Result<()> {
        let summary = last_user_line(chat_messages(&msg)).to_string();
        let session_id = msg.payload_str("session_id").map(str::to_string);
        let ticket = self.store.open(summary, session_id);
        info!("Opened {} for message {}", ticket.id, msg.id);

        let content = format!(
            "I've opened ticket {} for you. Our support team will follow up shortly.",
            ticket.id
        );
        publish_reply(&self.human, &msg, TICKETING_AGENT, content)?;
        Ok(())
    }
}

/// Build the ticketing agent: answers `routed_message` addressed to it
pub fn ticketing_agent(
    human: &Channel,
    agents: &Channel,
    store: TicketStore,
) -> Result<Agent, BusError> {
    let mut agent = Agent::new(TICKETING_AGENT);
    agent.subscribe(
        agents,
        Filter::targeting(TICKETING_AGENT),
        Arc::new(TicketingHandler::new(store, human.clone())),
    )?;
    Ok(agent)
}
