//! LLM Data Models
//!
//! Error types and per-call limits for the LLM capability.

use std::time::Duration;

/// Per-call limits. Stages derive these from their batch size.
#[derive(Debug, Clone)]
pub struct CompletionLimits {
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl CompletionLimits {
    pub fn new(max_tokens: u32, timeout: Duration) -> Self {
        Self { max_tokens, timeout }
    }
}

/// LLM capability errors
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM service disabled")]
    Disabled,

    #[error("LLM API key not configured")]
    MissingApiKey,

    #[error("LLM API error: {0}")]
    ApiError(String),

    #[error("LLM response parsing error: {0}")]
    ParseError(String),

    #[error("LLM timeout after {0}s")]
    Timeout(u64),

    #[error("LLM rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::RateLimited(_) | Self::ApiError(_))
    }
}
