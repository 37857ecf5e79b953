//! switchboard-core - triage and routing for the switchboard bus
//!
//! This crate provides:
//! - An LLM provider abstraction with an OpenAI-compatible implementation
//! - The classifier service that maps a chat transcript to a target agent
//! - A bootstrap few-shot optimizer that compiles and persists classifier artifacts
//! - The triage, policy, and ticketing agents wired onto switchboard channels
//! - The runtime context that is built once and injected into every agent

pub mod agents;
pub mod classifier;
pub mod context;
pub mod error;
pub mod providers;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use agents::{RoutingPolicy, Ticket, TicketStore};
pub use classifier::{
    Classification, Classifier, CompiledProgram, KeywordClassifier, LlmClassifier,
    OptimizeOutcome, OptimizerConfig, TargetAgent, TrainingExample,
};
pub use context::{ChannelNames, SwitchboardContext};
pub use error::ClassifierError;
pub use providers::{ChatMessage, ChatOptions, ChatResponse, LlmProvider, OpenAiProvider};
