//! LLM provider abstraction
//!
//! The classifier and the policy agent only need plain text chat completions,
//! so providers implement the [`LlmProvider`] trait over text messages.

pub mod openai;
pub mod types;

pub use openai::OpenAiProvider;
pub use types::{ChatMessage, ChatOptions, ChatResponse, ChatRole, ChatUsage, LlmProvider, StopReason};
