// Common test utilities and helpers

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::Thresholds;
use crate::models::article::NewArticle;
use crate::services::article_store::ArticleStore;
use crate::services::fetcher::{ContentFetcher, FetchError, PassthroughResolver};
use crate::services::llm::{CompletionLimits, LlmClient, LlmError};
use crate::services::pipeline::Pipeline;

/// Create an in-memory SQLite database for testing
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(3))
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Test thresholds: production defaults minus the inter-batch sleeps.
pub fn test_thresholds() -> Thresholds {
    Thresholds { delay_between_batches_ms: 0, ..Thresholds::default() }
}

/// LLM double that replays a fixed sequence of responses. Running out of
/// responses is an error, so tests also assert how many calls were made.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedLlm {
    pub fn new<S: Into<String>>(responses: Vec<S>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        })
    }

    pub fn empty() -> Arc<Self> {
        Self::new(Vec::<String>::new())
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().expect("llm lock").len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn is_available(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _limits: &CompletionLimits,
    ) -> Result<String, LlmError> {
        self.responses
            .lock()
            .expect("llm lock")
            .pop_front()
            .ok_or_else(|| LlmError::ApiError("no scripted response left".to_string()))
    }
}

/// Fetcher double serving canned HTML per URL; unknown URLs 404.
#[derive(Default)]
pub struct MapFetcher {
    pages: HashMap<String, String>,
}

impl MapFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: impl Into<String>) -> Self {
        self.pages.insert(url.to_string(), html.into());
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl ContentFetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.pages
            .get(url)
            .cloned()
            .ok_or(FetchError::Status(404))
    }
}

/// Pipeline wired with test doubles over the given pool.
pub fn test_pipeline(
    pool: &SqlitePool,
    llm: Arc<dyn LlmClient>,
    fetcher: Arc<dyn ContentFetcher>,
) -> Arc<Pipeline> {
    let store = Arc::new(ArticleStore::new(pool.clone()));
    Arc::new(Pipeline::new(
        store,
        llm,
        fetcher,
        Arc::new(PassthroughResolver),
        test_thresholds(),
        10,
    ))
}

/// A raw article as a provider would deliver it.
pub fn raw_article(url: &str, title: &str, searched_by: &str) -> NewArticle {
    NewArticle {
        url: url.to_string(),
        title: title.to_string(),
        description: None,
        url_to_image: None,
        content: None,
        source_id: None,
        source_name: Some("Newswire".to_string()),
        author: None,
        published_at: Some(Utc::now()),
        feed_source: Some("test".to_string()),
        searched_by: Some(searched_by.to_string()),
    }
}

/// HTML page whose `<article>` clean text is roughly `words` words long.
pub fn article_html(words: usize) -> String {
    let body: String = (0..words)
        .map(|i| format!("word{} ", i))
        .collect::<String>();
    format!("<html><body><article><p>{}</p></article></body></html>", body.trim())
}

/// Seed a holding row directly.
pub async fn seed_holding(pool: &SqlitePool, ticker: &str, label: Option<&str>) {
    sqlx::query("INSERT INTO holdings (user_id, ticker, label) VALUES (1, ?, ?)")
        .bind(ticker)
        .bind(label)
        .execute(pool)
        .await
        .expect("Failed to seed holding");
}
