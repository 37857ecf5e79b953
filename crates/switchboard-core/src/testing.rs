//! Scripted providers for unit tests

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::providers::{ChatMessage, ChatOptions, ChatResponse, ChatUsage, LlmProvider, StopReason};

type Responder = Box<dyn Fn(&[ChatMessage], &str) -> Result<String> + Send + Sync>;

/// A provider whose answers come from a closure
pub(crate) struct ScriptedProvider {
    responder: Responder,
    calls: AtomicUsize,
    options: Mutex<Vec<ChatOptions>>,
}

impl ScriptedProvider {
    pub(crate) fn new<F>(responder: F) -> Self
    where
        F: Fn(&[ChatMessage], &str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            options: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn always(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| Ok(text.clone()))
    }

    pub(crate) fn failing(reason: &str) -> Self {
        let reason = reason.to_string();
        Self::new(move |_, _| Err(anyhow!("{}", reason)))
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn recorded_options(&self) -> Vec<ChatOptions> {
        self.options.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        system: &str,
        options: &ChatOptions,
    ) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.options.lock().unwrap().push(*options);
        let text = (self.responder)(messages, system)?;
        Ok(ChatResponse {
            text,
            stop_reason: StopReason::EndTurn,
            usage: ChatUsage::default(),
        })
    }
}

/// The JSON a well-behaved classifier backend answers with
pub(crate) fn classification_json(label: &str, confidence: f64) -> String {
    serde_json::json!({
        "reasoning": format!("The conversation belongs with {}.", label),
        "target_agent": label,
        "confidence": confidence,
    })
    .to_string()
}

/// The transcript the classifier was asked about: the last user turn
pub(crate) fn last_user_turn(messages: &[ChatMessage]) -> String {
    messages
        .last()
        .map(|m| m.content.clone())
        .unwrap_or_default()
}
