//! Triage agent: classify each user message and route it to an agent

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use switchboard_channels::{
    Agent, BusError, Channel, Filter, HandlerContext, Message, MessageHandler, kinds,
};
use tracing::{debug, error, info, warn};

use super::{chat_messages, publish_reply};
use crate::classifier::{Classification, Classifier, TargetAgent};

pub const TRIAGE_AGENT: &str = "TriageAgent";

const DECLINE_MESSAGE: &str = "I'm sorry, I can only help with insurance-related questions. \
Is there anything about your policy or a claim I can help you with?";

/// What to do with a classification before publishing it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingPolicy {
    /// Classifications below this confidence go to `fallback_target`
    pub min_confidence: f64,
    pub fallback_target: TargetAgent,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            min_confidence: 0.0,
            fallback_target: TargetAgent::TicketingAgent,
        }
    }
}

impl RoutingPolicy {
    pub fn resolve(&self, classification: &Classification) -> TargetAgent {
        if classification.confidence < self.min_confidence {
            self.fallback_target
        } else {
            classification.target
        }
    }
}

/// Handles `user_message` on the human channel
pub struct TriageHandler {
    classifier: Arc<dyn Classifier>,
    agents: Channel,
    routing: RoutingPolicy,
}

impl TriageHandler {
    pub fn new(classifier: Arc<dyn Classifier>, agents: Channel, routing: RoutingPolicy) -> Self {
        Self {
            classifier,
            agents,
            routing,
        }
    }
}

#[async_trait]
impl MessageHandler for TriageHandler {
    async fn handle(&self, msg: Message, ctx: HandlerContext) -> Result<()> {
        if !msg.is_kind(kinds::USER_MESSAGE) {
            debug!("Triage ignoring {} message {}", msg.kind, msg.id);
            return Ok(());
        }

        let classification = match self.classifier.classify(chat_messages(&msg)).await {
            Ok(c) => c,
            Err(e) => {
                // Dropped: no retry, no dead-letter queue
                error!(
                    "Triage failed to classify message {} with {} classifier: {}",
                    msg.id,
                    self.classifier.name(),
                    e
                );
                return Ok(());
            }
        };

        let target = self.routing.resolve(&classification);
        if target != classification.target {
            info!(
                "Confidence {:.2} below {:.2}, routing message {} to {} instead of {}",
                classification.confidence,
                self.routing.min_confidence,
                msg.id,
                target,
                classification.target
            );
        }

        if ctx.is_cancelled() {
            warn!("Triage stopped before routing message {}, dropping it", msg.id);
            return Ok(());
        }

        let routed = Message::routed(target.as_str(), msg.payload);
        match self.agents.publish(routed) {
            Ok(delivered) => info!(
                "Routed message {} to {} (confidence {:.2}, {} subscriber(s))",
                msg.id, target, classification.confidence, delivered
            ),
            Err(e) => error!("Failed to route message {} to {}: {}", msg.id, target, e),
        }
        Ok(())
    }
}

/// Politely declines conversations that were routed back to triage
struct DeclineHandler {
    human: Channel,
}

#[async_trait]
impl MessageHandler for DeclineHandler {
    async fn handle(&self, msg: Message, _ctx: HandlerContext) -> Result<()> {
        publish_reply(&self.human, &msg, TRIAGE_AGENT, DECLINE_MESSAGE)?;
        Ok(())
    }
}

/// Build the triage agent: classifies `user_message` on `human` and answers
/// non-insurance conversations routed back to it on `agents`
pub fn triage_agent(
    human: &Channel,
    agents: &Channel,
    classifier: Arc<dyn Classifier>,
    routing: RoutingPolicy,
) -> Result<Agent, BusError> {
    let mut agent = Agent::new(TRIAGE_AGENT);
    agent.on(
        human,
        kinds::USER_MESSAGE,
        Arc::new(TriageHandler::new(classifier, agents.clone(), routing)),
    )?;
    agent.subscribe(
        agents,
        Filter::targeting(TRIAGE_AGENT),
        Arc::new(DeclineHandler {
            human: human.clone(),
        }),
    )?;
    Ok(agent)
}
