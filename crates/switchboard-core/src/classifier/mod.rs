//! Classifier service: chat transcript in, target agent out
//!
//! Two backends implement [`Classifier`]:
//! - [`LlmClassifier`] prompts a chat model with a compiled few-shot program
//! - [`KeywordClassifier`] is a deterministic offline heuristic
//!
//! [`optimize`] compiles a program from a labeled training set and persists it
//! as a [`CompiledProgram`] artifact that [`LlmClassifier::load`] reads back.

mod keyword;
mod llm;
mod optimizer;
mod program;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;

pub use keyword::KeywordClassifier;
pub use llm::LlmClassifier;
pub use optimizer::{OptimizeOutcome, OptimizerConfig, TrainingExample, load_training_set, optimize};
pub use program::{CompiledProgram, DEFAULT_INSTRUCTIONS, Demo};

/// The closed set of agents a conversation can be routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetAgent {
    PolicyAgent,
    TicketingAgent,
    TriageAgent,
}

impl TargetAgent {
    pub const ALL: [TargetAgent; 3] = [
        TargetAgent::PolicyAgent,
        TargetAgent::TicketingAgent,
        TargetAgent::TriageAgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PolicyAgent => "PolicyAgent",
            Self::TicketingAgent => "TicketingAgent",
            Self::TriageAgent => "TriageAgent",
        }
    }

    /// What the agent handles, as shown to the model
    pub fn description(&self) -> &'static str {
        match self {
            Self::PolicyAgent => "Handles policy-related queries.",
            Self::TicketingAgent => "Handles unresolved insurance-related queries.",
            Self::TriageAgent => "Handles non-insurance-related queries.",
        }
    }
}

impl fmt::Display for TargetAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetAgent {
    type Err = ClassifierError;

    /// Case-insensitive; surrounding whitespace and quotes are ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = s.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`');
        Self::ALL
            .into_iter()
            .find(|agent| agent.as_str().eq_ignore_ascii_case(cleaned))
            .ok_or_else(|| ClassifierError::UnknownLabel(s.to_string()))
    }
}

/// A routing decision with the model's self-reported certainty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub target: TargetAgent,
    /// Always within [0.0, 1.0]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Classification {
    pub fn new(target: TargetAgent, confidence: f64) -> Self {
        Self {
            target,
            confidence: clamp_confidence(confidence),
            reasoning: None,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

/// Last `User:` line of a transcript without the prefix, or the whole
/// transcript when there is none
pub(crate) fn last_user_line(chat_history: &str) -> &str {
    chat_history
        .lines()
        .rev()
        .find_map(|line| line.trim_start().strip_prefix("User:"))
        .map(str::trim)
        .unwrap_or_else(|| chat_history.trim())
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Maps a chat transcript to a target agent.
///
/// LLM-backed implementations may answer differently for the same input.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    async fn classify(&self, chat_history: &str) -> Result<Classification, ClassifierError>;
}
