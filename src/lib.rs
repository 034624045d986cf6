//! Tickerwire Library
//!
//! Core modules of the personalized financial-news pipeline: a staged
//! article processor over a SQLite store, an LLM capability for triage and
//! classification, and the admin/feed HTTP surface.

use sqlx::SqlitePool;
use std::sync::Arc;

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::Config;
pub use services::llm::{LlmClient, LlmError, OpenAiCompatClient};
pub use services::{
    ArticleStore, FeedService, HoldingService, IngestService, Pipeline, PipelineTickTask,
};

/// Application shared state
///
/// Rust's type system is the DI container: every service is an Arc field,
/// cheap to clone into handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,

    pub article_store: Arc<ArticleStore>,
    pub holding_service: Arc<HoldingService>,
    pub feed_service: Arc<FeedService>,
    pub ingest_service: Arc<IngestService>,
    pub pipeline: Arc<Pipeline>,

    pub llm_available: bool,
}
