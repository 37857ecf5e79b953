//! OpenAI chat completions provider (gpt-4o-mini, gpt-4o, etc.)

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::types::{
    ChatMessage, ChatOptions, ChatResponse, ChatRole, ChatUsage, LlmProvider, StopReason,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Chat completions client for OpenAI and compatible endpoints
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            max_tokens,
        })
    }

    /// System text goes first as its own message; `System` turns in the history are dropped
    fn to_openai_messages(messages: &[ChatMessage], system: &str) -> Vec<OpenAiMessage> {
        let mut result = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            result.push(OpenAiMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }

        for msg in messages {
            // A system prompt is passed separately
            if msg.role == ChatRole::System {
                continue;
            }
            result.push(OpenAiMessage {
                role: msg.role.to_string(),
                content: msg.content.clone(),
            });
        }

        result
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        system: &str,
        options: &ChatOptions,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": Self::to_openai_messages(messages, system),
        });

        if options.json_output {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        body
    }

    fn from_openai_response(resp: OpenAiApiResponse) -> Result<ChatResponse> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("OpenAI response had no choices"))?;

        let stop_reason = match choice.finish_reason.as_deref() {
            Some("stop") => StopReason::EndTurn,
            Some("length") => StopReason::MaxTokens,
            _ => StopReason::Unknown,
        };

        let usage = resp.usage.map_or(ChatUsage::default(), |u| ChatUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });

        Ok(ChatResponse {
            text: choice.message.content.unwrap_or_default(),
            stop_reason,
            usage,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        system: &str,
        options: &ChatOptions,
    ) -> Result<ChatResponse> {
        if self.api_key.is_empty() {
            return Err(anyhow!("OpenAI API key is not configured (set OPENAI_API_KEY)"));
        }

        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.request_body(messages, system, options);

        debug!(
            "OpenAI request: model={}, messages={}, json={}",
            self.model,
            messages.len(),
            options.json_output
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send request to OpenAI API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "OpenAI API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: OpenAiApiResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI API response")?;

        let result = Self::from_openai_response(api_response)?;
        debug!(
            "OpenAI response: stop={:?}, tokens in={} out={}",
            result.stop_reason, result.usage.input_tokens, result.usage.output_tokens
        );
        Ok(result)
    }
}

// Wire types for /v1/chat/completions

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiApiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(key: &str) -> OpenAiProvider {
        OpenAiProvider::new(
            key.to_string(),
            DEFAULT_MODEL.to_string(),
            "https://api.openai.com/".to_string(),
            512,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_to_openai_messages_simple() {
        let msgs = vec![ChatMessage::user("hello")];
        let result = OpenAiProvider::to_openai_messages(&msgs, "You are helpful.");
        // system + user = 2
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].role, "system");
        assert_eq!(result[0].content, "You are helpful.");
        assert_eq!(result[1].role, "user");
        assert_eq!(result[1].content, "hello");
    }

    #[test]
    fn test_to_openai_messages_skips_inline_system() {
        let msgs = vec![
            ChatMessage {
                role: ChatRole::System,
                content: "ignored".to_string(),
            },
            ChatMessage::user("q"),
            ChatMessage::assistant("a"),
        ];
        let result = OpenAiProvider::to_openai_messages(&msgs, "");
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].role, "user");
        assert_eq!(result[1].role, "assistant");
    }

    #[test]
    fn test_request_body_options() {
        let p = provider("sk-test");
        let plain = p.request_body(&[ChatMessage::user("hi")], "sys", &ChatOptions::default());
        assert!(plain.get("response_format").is_none());
        assert!(plain.get("temperature").is_none());

        let options = ChatOptions::json().with_temperature(1.0);
        let json = p.request_body(&[ChatMessage::user("hi")], "sys", &options);
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["temperature"], 1.0);
        assert_eq!(json["model"], DEFAULT_MODEL);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(provider("k").base_url, "https://api.openai.com");
    }

    #[test]
    fn test_from_openai_response_text() {
        let resp = OpenAiApiResponse {
            choices: vec![OpenAiChoice {
                message: OpenAiChoiceMessage {
                    content: Some("Hello!".to_string()),
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: Some(OpenAiUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            }),
        };
        let result = OpenAiProvider::from_openai_response(resp).unwrap();
        assert_eq!(result.stop_reason, StopReason::EndTurn);
        assert_eq!(result.usage.input_tokens, 10);
        assert_eq!(result.text, "Hello!");
    }

    #[test]
    fn test_from_openai_response_no_choices() {
        let resp = OpenAiApiResponse {
            choices: vec![],
            usage: None,
        };
        assert!(OpenAiProvider::from_openai_response(resp).is_err());
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        let err = provider("")
            .chat(&[ChatMessage::user("hi")], "sys", &ChatOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_openai_provider_debug_hides_key() {
        let debug = format!("{:?}", provider("sk-secret-key"));
        assert!(!debug.contains("sk-secret-key"));
    }
}
