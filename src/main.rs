use axum::Router;
use axum::routing::{delete, get, post};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tickerwire::config::Config;
use tickerwire::db;
use tickerwire::handlers;
use tickerwire::models::article::Profile;
use tickerwire::services::fetcher::{HttpContentFetcher, PassthroughResolver};
use tickerwire::services::{
    ArticleStore, FeedService, HoldingService, IngestService, LlmClient, OpenAiCompatClient,
    Pipeline, PipelineTickTask,
};
use tickerwire::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("tickerwire.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Tickerwire starting up");

    let pool = db::create_pool(&config.database.url).await?;
    tracing::info!("Database pool created, migrations applied");

    let article_store = Arc::new(ArticleStore::new(pool.clone()));
    let holding_service = Arc::new(HoldingService::new(pool.clone()));
    let feed_service = Arc::new(FeedService::new(pool.clone(), config.thresholds.clone()));

    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiCompatClient::new(config.llm.clone()));
    let llm_available = llm.is_available();
    if !llm_available {
        tracing::warn!("LLM client is not available; triage and classification will fail");
    }

    let fetcher = Arc::new(HttpContentFetcher::new(&config.fetch));
    let resolver = Arc::new(PassthroughResolver);

    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&article_store),
        llm,
        fetcher,
        resolver,
        config.thresholds.clone(),
        config.pipeline.incremental_top_n,
    ));

    // Provider clients are external collaborators; none wired by default.
    let ingest_service = Arc::new(IngestService::new(Arc::clone(&article_store), None));

    if config.pipeline.tick_enabled {
        let tick_task = PipelineTickTask::new(
            Arc::clone(&pipeline),
            Arc::clone(&holding_service),
            Profile::parse_or_balanced(&config.pipeline.user_profile),
            config.pipeline.tick_batch_limit,
        );
        tick_task.spawn(Duration::from_secs(config.pipeline.tick_interval_secs));
        tracing::info!(
            "Background pipeline tick enabled (every {}s)",
            config.pipeline.tick_interval_secs
        );
    }

    let state = Arc::new(AppState {
        db: pool,
        config: config.clone(),
        article_store,
        holding_service,
        feed_service,
        ingest_service,
        pipeline,
        llm_available,
    });

    let app = Router::new()
        .route("/api/feed", get(handlers::feed::get_feed))
        .route(
            "/api/holdings",
            get(handlers::holding::list_holdings).post(handlers::holding::add_holding),
        )
        .route("/api/holdings/:id", delete(handlers::holding::remove_holding))
        .route("/api/admin/ingest", post(handlers::admin::ingest))
        .route("/api/admin/process", post(handlers::admin::process))
        .route("/api/admin/rank", post(handlers::admin::rank))
        .route("/api/admin/health", get(handlers::admin::health))
        .route("/api/admin/clear", post(handlers::admin::clear))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
