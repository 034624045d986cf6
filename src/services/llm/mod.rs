//! LLM Capability Module
//!
//! A provider-agnostic chat RPC used by the title-triage and classification
//! stages. The client is an injected capability: stages receive an
//! `Arc<dyn LlmClient>` and never reach for process-wide state. Prompts and
//! response schemas live with the stages that own them.

mod client;
mod models;

pub use client::{LlmClient, OpenAiCompatClient, extract_json_object, sanitize_prompt};
pub use models::{CompletionLimits, LlmError};
