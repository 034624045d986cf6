pub mod article_store;
pub mod feed_service;
pub mod fetcher;
pub mod holding_service;
pub mod llm;
pub mod news_provider;
pub mod pipeline;

pub use article_store::{ArticleStore, ArticleUpdate};
pub use feed_service::{FeedQuery, FeedService};
pub use fetcher::{
    ContentFetcher, FetchError, HttpContentFetcher, PassthroughResolver, RedirectResolver,
};
pub use holding_service::HoldingService;
pub use llm::{CompletionLimits, LlmClient, LlmError, OpenAiCompatClient};
pub use news_provider::{IngestReport, IngestService, NewsProvider};
pub use pipeline::{Pipeline, PipelineReport, PipelineTickTask};
