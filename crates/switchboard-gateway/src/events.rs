//! Event fan-out to every connected WebSocket client

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::protocol::GatewayEvent;

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<GatewayEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Each WebSocket connection gets its own receiver
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }

    /// Send an event to every connected client; returns how many got it
    pub fn broadcast(&self, event: GatewayEvent) -> usize {
        if self.sender.receiver_count() == 0 {
            return 0;
        }
        debug!("Broadcasting event '{}'", event.event);
        self.sender.send(event).unwrap_or(0)
    }

    pub fn emit(&self, event: &str, data: Value) -> usize {
        self.broadcast(GatewayEvent::new(event, data))
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
