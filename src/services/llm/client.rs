//! LLM Client - HTTP client for OpenAI-compatible APIs
//!
//! Uses reqwest to call LLM APIs. Compatible with:
//! - OpenAI
//! - Azure OpenAI
//! - DeepSeek
//! - Other OpenAI-compatible APIs

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::models::{CompletionLimits, LlmError};
use crate::config::LlmConfig;

/// The LLM capability the pipeline stages depend on.
///
/// One chat-style RPC: system prompt, user prompt, JSON-object response
/// format, per-call token and timeout limits. Stages own their prompts and
/// parse the returned content themselves (see [`extract_json_object`]).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        limits: &CompletionLimits,
    ) -> Result<String, LlmError>;

    fn is_available(&self) -> bool;
}

/// reqwest-backed client for OpenAI-compatible chat completion endpoints.
pub struct OpenAiCompatClient {
    http_client: Client,
    settings: LlmConfig,
}

impl OpenAiCompatClient {
    pub fn new(settings: LlmConfig) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self { http_client, settings }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn is_available(&self) -> bool {
        self.settings.enabled && self.settings.api_key.is_some()
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        limits: &CompletionLimits,
    ) -> Result<String, LlmError> {
        if !self.settings.enabled {
            return Err(LlmError::Disabled);
        }
        let api_key = self.settings.api_key.as_ref().ok_or(LlmError::MissingApiKey)?;

        let chat_request = ChatCompletionRequest {
            model: self.settings.model_name.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: sanitize_prompt(system_prompt),
                },
                ChatMessage { role: "user".to_string(), content: sanitize_prompt(user_prompt) },
            ],
            max_tokens: Some(limits.max_tokens),
            temperature: Some(self.settings.temperature),
            response_format: Some(ResponseFormat { r#type: "json_object".to_string() }),
        };

        let url = format!("{}/chat/completions", self.settings.api_base.trim_end_matches('/'));

        tracing::debug!(
            "Calling LLM API: {} with model {}",
            url,
            self.settings.model_name
        );

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .timeout(limits.timeout)
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(limits.timeout.as_secs())
                } else {
                    LlmError::ApiError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited(retry_after));
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::ApiError(format!("API error {}: {}", status, error_text)));
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::ParseError("Empty response from LLM".to_string()))?;

        Ok(content)
    }
}

// ============================================================================
// Response Content Helpers
// ============================================================================

/// Parse an LLM response as a JSON object, tolerating fenced code blocks and
/// chatter around the payload: on direct-parse failure, the first `{` … last
/// `}` substring is retried.
pub fn extract_json_object(content: &str) -> Result<serde_json::Value, LlmError> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if value.is_object() {
            return Ok(value);
        }
    }

    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    if let (Some(start), Some(end)) = (start, end) {
        if start < end {
            let candidate = &trimmed[start..=end];
            let value = serde_json::from_str::<serde_json::Value>(candidate).map_err(|e| {
                LlmError::ParseError(format!("Failed to parse LLM response: {}", e))
            })?;
            if value.is_object() {
                return Ok(value);
            }
        }
    }

    Err(LlmError::ParseError("No JSON object found in LLM response".to_string()))
}

/// Strip control characters that break JSON request bodies; newlines and tabs
/// survive.
pub fn sanitize_prompt(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

// ============================================================================
// OpenAI API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_json_object() {
        let value = extract_json_object(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn extracts_fenced_json_object() {
        let content = "```json\n{\"a\": 1, \"b\": [2]}\n```";
        let value = extract_json_object(content).unwrap();
        assert_eq!(value["b"][0], 2);
    }

    #[test]
    fn extracts_object_with_surrounding_chatter() {
        let content = "Here is the result:\n{\"ok\": true}\nLet me know!";
        let value = extract_json_object(content).unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn rejects_content_without_object() {
        assert!(extract_json_object("no json here").is_err());
        assert!(extract_json_object("[1, 2, 3]").is_err());
    }

    #[test]
    fn sanitize_strips_control_chars() {
        assert_eq!(sanitize_prompt("a\u{0000}b\nc\td"), "ab\nc\td");
    }
}
