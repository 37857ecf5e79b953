//! Policy agent: answers policy questions routed to it

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use switchboard_channels::{Agent, BusError, Channel, Filter, HandlerContext, Message, MessageHandler};
use tracing::{debug, warn};

use super::{chat_messages, last_user_line, publish_reply};
use crate::providers::{ChatMessage, ChatOptions, LlmProvider};

pub const POLICY_AGENT: &str = "PolicyAgent";

const POLICY_SYSTEM_PROMPT: &str = "\
You are the Policy agent of an insurance support team. Answer the customer's \
questions about their insurance policy: coverage, premiums, deductibles, \
renewals, and beneficiaries. Be concise and friendly. If you need a policy \
number to answer, ask for it. Never invent policy details.";

pub struct PolicyHandler {
    provider: Option<Arc<dyn LlmProvider>>,
    human: Channel,
}

impl PolicyHandler {
    pub fn new(provider: Option<Arc<dyn LlmProvider>>, human: Channel) -> Self {
        Self { provider, human }
    }

    async fn answer(&self, chat_history: &str, ctx: &HandlerContext) -> Result<Option<String>> {
        let Some(provider) = &self.provider else {
            return Ok(Some(canned_answer(chat_history)));
        };

        let messages = [ChatMessage::user(chat_history)];
        let options = ChatOptions::default();
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                warn!("Policy agent stopped while answering, reply abandoned");
                Ok(None)
            }
            response = provider.chat(&messages, POLICY_SYSTEM_PROMPT, &options) => {
                let response = response.context("Policy agent failed to get an answer")?;
                Ok(Some(response.text))
            }
        }
    }
}

#[async_trait]
impl MessageHandler for PolicyHandler {
    async fn handle(&self, msg: Message, ctx: HandlerContext) -> Result<()> {
        let chat_history = chat_messages(&msg);
        debug!("Policy agent handling message {}", msg.id);

        if let Some(answer) = self.answer(chat_history, &ctx).await? {
            publish_reply(&self.human, &msg, POLICY_AGENT, answer)?;
        }
        Ok(())
    }
}

fn canned_answer(chat_history: &str) -> String {
    let question = last_user_line(chat_history);
    if question.is_empty() {
        "Thanks for reaching out about your policy. Could you share your policy number \
         and what you'd like to know?"
            .to_string()
    } else {
        format!(
            "Thanks for reaching out about your policy. A policy specialist will look into \
             \"{}\". Could you share your policy number in the meantime?",
            question
        )
    }
}

/// Build the policy agent: answers `routed_message` addressed to it
pub fn policy_agent(
    human: &Channel,
    agents: &Channel,
    provider: Option<Arc<dyn LlmProvider>>,
) -> Result<Agent, BusError> {
    let mut agent = Agent::new(POLICY_AGENT);
    agent.subscribe(
        agents,
        Filter::targeting(POLICY_AGENT),
        Arc::new(PolicyHandler::new(provider, human.clone())),
    )?;
    Ok(agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use switchboard_channels::{ChannelHub, kinds};

    use crate::testing::ScriptedProvider;

    async fn ask(provider: Option<Arc<dyn LlmProvider>>, routed: Message) -> Option<Message> {
        let hub = ChannelHub::new();
        let human = hub.channel("human").unwrap();
        let agents = hub.channel("agents").unwrap();
        let mut replies = human.subscribe("observer", Filter::Any).unwrap();

        let mut agent = policy_agent(&human, &agents, provider).unwrap();
        agent.run().await.unwrap();
        agents.publish(routed).unwrap();

        let reply = tokio::time::timeout(Duration::from_millis(200), replies.recv())
            .await
            .ok()
            .flatten();
        agent.stop().await.unwrap();
        reply
    }

    fn routed(target: &str, transcript: &str) -> Message {
        Message::routed(target, Default::default())
            .with_field("chat_messages", transcript)
            .with_field("session_id", "s1")
    }

    #[tokio::test]
    async fn test_answers_with_provider() {
        let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::new(|messages, system| {
            assert!(system.contains("Policy agent"));
            Ok(format!("You asked: {}", messages[0].content))
        }));

        let reply = ask(Some(provider), routed(POLICY_AGENT, "User: Is hail covered?"))
            .await
            .unwrap();
        assert_eq!(reply.kind, kinds::AGENT_MESSAGE);
        assert_eq!(reply.payload_str("agent"), Some(POLICY_AGENT));
        assert_eq!(reply.payload_str("content"), Some("You asked: User: Is hail covered?"));
        assert_eq!(reply.payload_str("session_id"), Some("s1"));
    }

    #[tokio::test]
    async fn test_canned_answer_without_provider() {
        let reply = ask(None, routed(POLICY_AGENT, "User: When does my policy renew?"))
            .await
            .unwrap();
        let content = reply.payload_str("content").unwrap();
        assert!(content.contains("When does my policy renew?"));
    }

    #[tokio::test]
    async fn test_ignores_other_targets() {
        assert!(ask(None, routed("TicketingAgent", "User: my claim")).await.is_none());
    }

    #[tokio::test]
    async fn test_provider_error_sends_no_reply() {
        let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::failing("timeout"));
        assert!(ask(Some(provider), routed(POLICY_AGENT, "User: hi")).await.is_none());
    }

    #[test]
    fn test_canned_answer_without_question() {
        assert!(canned_answer("").contains("policy number"));
    }
}
