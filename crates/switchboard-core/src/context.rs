//! Runtime context shared by every agent
//!
//! Built once by the binary and passed down explicitly; nothing in the crate
//! reaches for process-wide state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use switchboard_channels::{Agent, BusError, Channel, ChannelHub};

use crate::agents::{RoutingPolicy, TicketStore, policy_agent, ticketing_agent, triage_agent};
use crate::classifier::Classifier;
use crate::providers::LlmProvider;

/// Names of the two channels the agents talk over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelNames {
    pub human: String,
    pub agents: String,
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            human: "human".to_string(),
            agents: "agents".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct SwitchboardContext {
    pub hub: ChannelHub,
    pub classifier: Arc<dyn Classifier>,
    /// Chat model for agents that write free-form answers
    pub provider: Option<Arc<dyn LlmProvider>>,
    pub routing: RoutingPolicy,
    pub channels: ChannelNames,
    pub tickets: TicketStore,
}

impl std::fmt::Debug for SwitchboardContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchboardContext")
            .field("classifier", &self.classifier.name())
            .field("provider", &self.provider.as_ref().map(|p| p.model().to_string()))
            .field("routing", &self.routing)
            .field("channels", &self.channels)
            .finish()
    }
}

impl SwitchboardContext {
    pub fn new(hub: ChannelHub, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            hub,
            classifier,
            provider: None,
            routing: RoutingPolicy::default(),
            channels: ChannelNames::default(),
            tickets: TicketStore::new(),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_routing(mut self, routing: RoutingPolicy) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_channel_names(mut self, channels: ChannelNames) -> Self {
        self.channels = channels;
        self
    }

    pub fn human(&self) -> Result<Channel, BusError> {
        self.hub.channel(&self.channels.human)
    }

    pub fn agents(&self) -> Result<Channel, BusError> {
        self.hub.channel(&self.channels.agents)
    }

    /// The triage, policy, and ticketing agents, in start order
    pub fn build_agents(&self) -> Result<Vec<Agent>, BusError> {
        let human = self.human()?;
        let agents = self.agents()?;
        Ok(vec![
            triage_agent(&human, &agents, self.classifier.clone(), self.routing)?,
            policy_agent(&human, &agents, self.provider.clone())?,
            ticketing_agent(&human, &agents, self.tickets.clone())?,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::KeywordClassifier;

    #[test]
    fn test_build_agents_in_order() {
        let ctx = SwitchboardContext::new(ChannelHub::new(), Arc::new(KeywordClassifier::new()));
        let agents = ctx.build_agents().unwrap();
        let names: Vec<&str> = agents.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["TriageAgent", "PolicyAgent", "TicketingAgent"]);
        assert_eq!(ctx.hub.names(), vec!["agents".to_string(), "human".to_string()]);
    }

    #[test]
    fn test_custom_channel_names() {
        let ctx = SwitchboardContext::new(ChannelHub::new(), Arc::new(KeywordClassifier::new()))
            .with_channel_names(ChannelNames {
                human: "chat".to_string(),
                agents: "backoffice".to_string(),
            });
        assert_eq!(ctx.human().unwrap().name(), "chat");
        assert_eq!(ctx.agents().unwrap().name(), "backoffice");
    }

    #[test]
    fn test_stopped_hub_cannot_build_agents() {
        let hub = ChannelHub::new();
        hub.stop();
        let ctx = SwitchboardContext::new(hub, Arc::new(KeywordClassifier::new()));
        assert!(matches!(ctx.build_agents(), Err(BusError::HubStopped)));
    }

    #[test]
    fn test_debug_names_classifier() {
        let ctx = SwitchboardContext::new(ChannelHub::new(), Arc::new(KeywordClassifier::new()));
        assert!(format!("{:?}", ctx).contains("keyword"));
    }
}
