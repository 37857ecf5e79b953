//! Few-shot chain-of-thought classifier over an LLM provider

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::program::{CompiledProgram, Demo};
use super::{Classification, Classifier, TargetAgent};
use crate::error::ClassifierError;
use crate::providers::{ChatMessage, ChatOptions, LlmProvider};

/// Classifies transcripts by prompting a chat model with a compiled program
pub struct LlmClassifier {
    provider: Arc<dyn LlmProvider>,
    program: CompiledProgram,
    system_prompt: String,
}

impl std::fmt::Debug for LlmClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClassifier")
            .field("provider", &self.provider.provider_name())
            .field("model", &self.provider.model())
            .field("demos", &self.program.demos.len())
            .finish()
    }
}

impl LlmClassifier {
    pub fn new(provider: Arc<dyn LlmProvider>, program: CompiledProgram) -> Self {
        let system_prompt = render_system_prompt(&program);
        Self {
            provider,
            program,
            system_prompt,
        }
    }

    /// A classifier with the default instructions and no demos
    pub fn uncompiled(provider: Arc<dyn LlmProvider>) -> Self {
        Self::new(provider, CompiledProgram::default())
    }

    /// Build a classifier from a persisted artifact
    pub async fn load(provider: Arc<dyn LlmProvider>, path: &Path) -> Result<Self, ClassifierError> {
        let program = CompiledProgram::load(path).await?;
        Ok(Self::new(provider, program))
    }

    pub fn program(&self) -> &CompiledProgram {
        &self.program
    }

    /// Classify with explicit request options
    pub(crate) async fn classify_with(
        &self,
        chat_history: &str,
        options: &ChatOptions,
    ) -> Result<Classification, ClassifierError> {
        let messages = self.render_messages(chat_history);
        let response = self
            .provider
            .chat(&messages, &self.system_prompt, options)
            .await
            .map_err(|e| ClassifierError::Backend(format!("{:#}", e)))?;

        let classification = parse_classification(&response.text)?;
        debug!(
            "Classified as {} (confidence {:.2}, {} tokens)",
            classification.target,
            classification.confidence,
            response.usage.total()
        );
        Ok(classification)
    }

    fn render_messages(&self, chat_history: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.program.demos.len() * 2 + 1);
        for demo in &self.program.demos {
            messages.push(ChatMessage::user(render_input(&demo.chat_history)));
            messages.push(ChatMessage::assistant(render_demo_output(demo)));
        }
        messages.push(ChatMessage::user(render_input(chat_history)));
        messages
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    fn name(&self) -> &str {
        "llm"
    }

    async fn classify(&self, chat_history: &str) -> Result<Classification, ClassifierError> {
        self.classify_with(chat_history, &ChatOptions::json()).await
    }
}

fn render_system_prompt(program: &CompiledProgram) -> String {
    let mut prompt = program.instructions.trim().to_string();
    prompt.push_str("\n\nTarget agents:\n");
    for agent in TargetAgent::ALL {
        prompt.push_str(&format!("- {}: {}\n", agent, agent.description()));
    }
    prompt.push_str(
        "\nThink step by step, then answer with a single JSON object with the keys:\n\
         - \"reasoning\": a short explanation of the decision\n\
         - \"target_agent\": one of PolicyAgent, TicketingAgent, TriageAgent\n\
         - \"confidence\": a number between 0.0 and 1.0 indicating certainty",
    );
    prompt
}

fn render_input(chat_history: &str) -> String {
    format!("Chat history:\n{}", chat_history)
}

fn render_demo_output(demo: &Demo) -> String {
    let reasoning = demo.reasoning.clone().unwrap_or_else(|| {
        format!("This conversation should be handled by {}.", demo.target_agent)
    });
    serde_json::json!({
        "reasoning": reasoning,
        "target_agent": demo.target_agent.as_str(),
        "confidence": demo.confidence.unwrap_or(1.0),
    })
    .to_string()
}

/// Parse the model's answer. Tolerates prose or code fences around the JSON
/// object and a confidence given as a string.
fn parse_classification(text: &str) -> Result<Classification, ClassifierError> {
    let json = extract_json_object(text)
        .ok_or_else(|| ClassifierError::MalformedResponse(truncate(text, 200)))?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| ClassifierError::MalformedResponse(format!("{}: {}", e, truncate(text, 200))))?;

    let label = value
        .get("target_agent")
        .and_then(Value::as_str)
        .ok_or_else(|| ClassifierError::MalformedResponse("missing target_agent".to_string()))?;
    let target: TargetAgent = label.parse()?;

    let confidence = match value.get("confidence") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| ClassifierError::MalformedResponse("missing or invalid confidence".to_string()))?;

    let mut classification = Classification::new(target, confidence);
    if let Some(reasoning) = value.get("reasoning").and_then(Value::as_str) {
        classification = classification.with_reasoning(reasoning);
    }
    Ok(classification)
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}
