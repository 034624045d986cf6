use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub llm: LlmConfig,
    pub fetch: FetchConfig,
    pub pipeline: PipelineConfig,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// LLM provider settings. The provider is deployment configuration, not a
/// runtime-editable entity; the key comes from the environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub api_base: String,
    pub api_key: Option<String>,
    pub model_name: String,
    pub temperature: f64,
}

/// Stage 2 HTTP fetch settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_redirects: usize,
    /// Google-RSS redirect safety policy (collaborator-owned).
    pub strict_redirect_allowlist: bool,
}

/// Background pipeline tick settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tick_enabled: bool,
    pub tick_interval_secs: u64,
    pub tick_batch_limit: i64,
    /// Default personalization profile: focus | balanced | broad.
    pub user_profile: String,
    /// Incremental mode processes this many articles synchronously.
    pub incremental_top_n: usize,
}

/// Central pipeline thresholds. Single source of truth for every gate,
/// batch size and formula constant the stages consult.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Cost-gate minimum likely_impact per bucket.
    pub process_gate_holdings: i64,
    pub process_gate_macro: i64,
    /// Feed query default minimum score.
    pub feed_rank_cutoff: i64,
    /// Stage 3 minimum impact_score to continue as llm_processed.
    pub stage3_min_impact: i64,
    /// Stage 4 minimum profile_adjusted_score to stay personalized.
    pub stage4_min_score: f64,
    /// Stage 4 skips the rich blend below this impact_score.
    pub stage4_cheap_path_below: i64,
    /// Holding-relevance formula constants.
    pub holding_relevance_base: i64,
    pub holding_relevance_match_bonus: i64,
    pub holding_relevance_per_match: i64,
    pub holding_relevance_max: i64,
    /// Stage 3 entry requires at least this much clean text.
    pub content_min_length: i64,
    /// Stage 2 quality gate floor.
    pub fetch_min_length: i64,
    pub max_fetch_attempts: i64,
    pub stage1_batch_size: usize,
    pub stage3_batch_size: usize,
    pub stage2_concurrency: usize,
    pub delay_between_batches_ms: u64,
    /// SimHash Hamming distance at or below which content is equivalent.
    pub dedup_hamming_threshold: u32,
    pub dedup_recency_hours: i64,
    pub dedup_candidate_limit: i64,
    /// Stage 5 shown-to-user cutoff on final_rank_score.
    pub rank_cutoff_score: i64,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "tickerwire")]
#[command(version, about = "Tickerwire - Personalized Financial News Pipeline")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Logging level (overrides config file, e.g., "info,tickerwire=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// LLM API base URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub llm_api_base: Option<String>,

    /// LLM model name (overrides config file)
    #[arg(long, value_name = "MODEL")]
    pub llm_model: Option<String>,

    /// Enable/disable the background pipeline tick (overrides config file)
    #[arg(long, value_name = "BOOL")]
    pub tick_enabled: Option<bool>,

    /// Default personalization profile: focus | balanced | broad
    #[arg(long, value_name = "PROFILE")]
    pub user_profile: Option<String>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file support
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();

        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST: Server host (default: 0.0.0.0)
    /// - APP_SERVER_PORT: Server port (default: 8080)
    /// - APP_DATABASE_URL: Database URL (default: sqlite://data/tickerwire.db)
    /// - APP_LOG_LEVEL: Logging level (e.g., "info,tickerwire=debug")
    /// - APP_LLM_API_BASE / APP_LLM_API_KEY / APP_LLM_MODEL: provider settings
    /// - APP_STRICT_REDIRECT_ALLOWLIST: Google-RSS redirect policy (true/false)
    /// - APP_TICK_ENABLED: Enable/disable background pipeline tick (true/false)
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }

        if let Ok(port) = std::env::var("APP_SERVER_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
                tracing::info!("Override server.port from env: {}", self.server.port);
            }
        }

        if let Ok(db_url) = std::env::var("APP_DATABASE_URL") {
            self.database.url = db_url;
            tracing::info!("Override database.url from env");
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Ok(api_base) = std::env::var("APP_LLM_API_BASE") {
            self.llm.api_base = api_base;
            tracing::info!("Override llm.api_base from env: {}", self.llm.api_base);
        }

        if let Ok(api_key) = std::env::var("APP_LLM_API_KEY") {
            self.llm.api_key = Some(api_key);
            tracing::info!("Override llm.api_key from env");
        }

        if let Ok(model) = std::env::var("APP_LLM_MODEL") {
            self.llm.model_name = model;
            tracing::info!("Override llm.model_name from env: {}", self.llm.model_name);
        }

        if let Ok(strict) = std::env::var("APP_STRICT_REDIRECT_ALLOWLIST") {
            if let Ok(val) = strict.parse() {
                self.fetch.strict_redirect_allowlist = val;
                tracing::info!(
                    "Override fetch.strict_redirect_allowlist from env: {}",
                    self.fetch.strict_redirect_allowlist
                );
            }
        }

        if let Ok(enabled) = std::env::var("APP_TICK_ENABLED") {
            if let Ok(val) = enabled.parse() {
                self.pipeline.tick_enabled = val;
                tracing::info!(
                    "Override pipeline.tick_enabled from env: {}",
                    self.pipeline.tick_enabled
                );
            }
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }

        if let Some(port) = args.server_port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }

        if let Some(db_url) = &args.database_url {
            self.database.url = db_url.clone();
            tracing::info!("Override database.url from CLI");
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }

        if let Some(api_base) = &args.llm_api_base {
            self.llm.api_base = api_base.clone();
            tracing::info!("Override llm.api_base from CLI: {}", self.llm.api_base);
        }

        if let Some(model) = &args.llm_model {
            self.llm.model_name = model.clone();
            tracing::info!("Override llm.model_name from CLI: {}", self.llm.model_name);
        }

        if let Some(enabled) = args.tick_enabled {
            self.pipeline.tick_enabled = enabled;
            tracing::info!("Override pipeline.tick_enabled from CLI: {}", enabled);
        }

        if let Some(profile) = &args.user_profile {
            self.pipeline.user_profile = profile.clone();
            tracing::info!("Override pipeline.user_profile from CLI: {}", profile);
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.llm.enabled && self.llm.api_key.is_none() {
            tracing::warn!("LLM is enabled but no API key is configured");
            tracing::warn!("Set APP_LLM_API_KEY or llm.api_key in config.toml");
        }

        if self.thresholds.stage1_batch_size == 0 || self.thresholds.stage3_batch_size == 0 {
            anyhow::bail!("Stage batch sizes must be > 0");
        }
        if self.thresholds.stage2_concurrency == 0 {
            anyhow::bail!("thresholds.stage2_concurrency must be > 0");
        }
        if self.thresholds.dedup_hamming_threshold > 64 {
            anyhow::bail!("thresholds.dedup_hamming_threshold must be <= 64");
        }
        if self.pipeline.tick_interval_secs == 0 {
            anyhow::bail!("pipeline.tick_interval_secs must be > 0");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://data/tickerwire.db".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,tickerwire=debug".to_string(),
            file: Some("logs/tickerwire.log".to_string()),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model_name: "gpt-4o-mini".to_string(),
            temperature: 0.2,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            timeout_secs: 5,
            max_redirects: 3,
            strict_redirect_allowlist: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_enabled: false,
            tick_interval_secs: 300,
            tick_batch_limit: 50,
            user_profile: "balanced".to_string(),
            incremental_top_n: 10,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            process_gate_holdings: 10,
            process_gate_macro: 15,
            feed_rank_cutoff: 25,
            stage3_min_impact: 20,
            stage4_min_score: 15.0,
            stage4_cheap_path_below: 40,
            holding_relevance_base: 20,
            holding_relevance_match_bonus: 10,
            holding_relevance_per_match: 5,
            holding_relevance_max: 45,
            content_min_length: 400,
            fetch_min_length: 200,
            max_fetch_attempts: 2,
            stage1_batch_size: 20,
            stage3_batch_size: 8,
            stage2_concurrency: 8,
            delay_between_batches_ms: 1000,
            dedup_hamming_threshold: 3,
            dedup_recency_hours: 48,
            dedup_candidate_limit: 50,
            rank_cutoff_score: 50,
        }
    }
}
