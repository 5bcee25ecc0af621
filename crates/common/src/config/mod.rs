//! Configuration management for DocSage services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use crate::errors::{AppError, Result};
use crate::prompts::PromptSet;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration (only needed by the postgres search backend)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Expansion and generation model configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Reranking service configuration
    #[serde(default)]
    pub rerank: RerankConfig,

    /// Hybrid search backend configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Context assembly configuration
    #[serde(default)]
    pub context: ContextConfig,

    /// Prompt templates
    #[serde(default)]
    pub prompts: PromptsConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Timeout for non-streaming requests in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Maximum concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL of the store exposing the hybrid search function
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Retries after a failed request (0 disables retrying)
    #[serde(default)]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Completion provider: openai, mock
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// API key for the completion service
    pub api_key: Option<String>,

    /// API base URL of an OpenAI-compatible endpoint
    #[serde(default = "default_llm_api_base")]
    pub api_base: String,

    /// Model used to expand the question into search queries
    #[serde(default = "default_expansion_model")]
    pub expansion_model: String,

    /// Model used to stream the final answer
    #[serde(default = "default_generation_model")]
    pub generation_model: String,

    /// Sampling temperature for expansion
    #[serde(default = "default_expansion_temperature")]
    pub expansion_temperature: f32,

    /// Sampling temperature for generation
    #[serde(default = "default_generation_temperature")]
    pub generation_temperature: f32,

    /// Maximum output tokens for the answer
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Timeout for a complete call, or for the first byte of a stream
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Maximum silence between two streamed fragments
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RerankConfig {
    /// Reranking provider: cohere, mock
    #[serde(default = "default_rerank_provider")]
    pub provider: String,

    /// API key for the reranking service
    pub api_key: Option<String>,

    /// API base URL
    #[serde(default = "default_rerank_api_base")]
    pub api_base: String,

    /// Cross-encoder model
    #[serde(default = "default_rerank_model")]
    pub model: String,

    /// Number of passages kept after reranking
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Request timeout in seconds
    #[serde(default = "default_rerank_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    /// Backend: postgres (SQL function), rpc (HTTP) or mock
    #[serde(default = "default_search_backend")]
    pub backend: String,

    /// Base URL of the RPC endpoint
    pub rpc_url: Option<String>,

    /// API key sent to the RPC endpoint
    pub rpc_api_key: Option<String>,

    /// Name of the fused-ranking function
    #[serde(default = "default_search_function")]
    pub function: String,

    /// Hits requested per expanded query
    #[serde(default = "default_match_count")]
    pub match_count: usize,

    /// Weight of the keyword ranking
    #[serde(default = "default_weight")]
    pub full_text_weight: f64,

    /// Weight of the semantic ranking
    #[serde(default = "default_weight")]
    pub semantic_weight: f64,

    /// Reciprocal rank fusion constant
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,

    /// Timeout per backend search call in seconds
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,

    /// Replace a failed query's hits with an empty list instead of failing
    #[serde(default)]
    pub isolate_failures: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContextConfig {
    /// Delimiter placed between passages
    #[serde(default = "default_separator")]
    pub separator: String,

    /// Optional cap on the assembled context, in characters
    pub max_chars: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptsConfig {
    /// Query expansion template, placeholder `{question}`
    #[serde(default = "default_expansion_prompt")]
    pub expansion: String,

    /// Answer template, placeholders `{question}`, `{context}`, `{abstain}`
    #[serde(default = "default_answer_prompt")]
    pub answer: String,

    /// Reply used when the context does not contain the answer
    #[serde(default = "default_abstain_phrase")]
    pub abstain_phrase: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (global)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 120 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_concurrent() -> usize { 100 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 1536 }
fn default_embedding_timeout() -> u64 { 15 }
fn default_llm_provider() -> String { "openai".to_string() }
fn default_llm_api_base() -> String { "https://api.openai.com/v1".to_string() }
fn default_expansion_model() -> String { "gpt-4o-mini".to_string() }
fn default_generation_model() -> String { "gpt-4o".to_string() }
fn default_expansion_temperature() -> f32 { 0.0 }
fn default_generation_temperature() -> f32 { 0.2 }
fn default_max_tokens() -> u32 { 1024 }
fn default_llm_timeout() -> u64 { 30 }
fn default_stream_idle_timeout() -> u64 { 30 }
fn default_rerank_provider() -> String { "cohere".to_string() }
fn default_rerank_api_base() -> String { "https://api.cohere.com/v2".to_string() }
fn default_rerank_model() -> String { "rerank-english-v3.0".to_string() }
fn default_top_k() -> usize { 5 }
fn default_rerank_timeout() -> u64 { 10 }
fn default_search_backend() -> String { "postgres".to_string() }
fn default_search_function() -> String { "hybrid_search".to_string() }
fn default_match_count() -> usize { 10 }
fn default_weight() -> f64 { 1.0 }
fn default_rrf_k() -> u32 { 50 }
fn default_search_timeout() -> u64 { 10 }
fn default_separator() -> String { "\n\n---\n\n".to_string() }
fn default_expansion_prompt() -> String { crate::prompts::DEFAULT_EXPANSION_TEMPLATE.to_string() }
fn default_answer_prompt() -> String { crate::prompts::DEFAULT_ANSWER_TEMPLATE.to_string() }
fn default_abstain_phrase() -> String { crate::prompts::DEFAULT_ABSTAIN_PHRASE.to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "docsage".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__RERANK__TOP_K=5
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Check that every configured provider has the credentials and
    /// endpoints it needs, and that the prompt templates are well formed.
    pub fn validate(&self) -> Result<()> {
        match self.embedding.provider.as_str() {
            "openai" => require(&self.embedding.api_key, "embedding.api_key")?,
            "mock" => {}
            other => return Err(AppError::config(format!("unknown embedding provider '{}'", other))),
        }

        match self.llm.provider.as_str() {
            "openai" => require(&self.llm.api_key, "llm.api_key")?,
            "mock" => {}
            other => return Err(AppError::config(format!("unknown llm provider '{}'", other))),
        }

        match self.rerank.provider.as_str() {
            "cohere" => require(&self.rerank.api_key, "rerank.api_key")?,
            "mock" => {}
            other => return Err(AppError::config(format!("unknown rerank provider '{}'", other))),
        }

        match self.search.backend.as_str() {
            "postgres" => {
                if self.database.is_none() {
                    return Err(AppError::config("search.backend=postgres requires a [database] section"));
                }
            }
            "rpc" => {
                require(&self.search.rpc_url, "search.rpc_url")?;
                require(&self.search.rpc_api_key, "search.rpc_api_key")?;
            }
            "mock" => {}
            other => return Err(AppError::config(format!("unknown search backend '{}'", other))),
        }

        if self.rerank.top_k == 0 {
            return Err(AppError::config("rerank.top_k must be greater than zero"));
        }
        if self.search.match_count == 0 {
            return Err(AppError::config("search.match_count must be greater than zero"));
        }
        if self.context.separator.is_empty() {
            return Err(AppError::config("context.separator must not be empty"));
        }
        if self.context.max_chars == Some(0) {
            return Err(AppError::config("context.max_chars must be greater than zero"));
        }

        // A zero timeout fails every call immediately
        for (key, secs) in [
            ("embedding.timeout_secs", self.embedding.timeout_secs),
            ("llm.timeout_secs", self.llm.timeout_secs),
            ("llm.stream_idle_timeout_secs", self.llm.stream_idle_timeout_secs),
            ("rerank.timeout_secs", self.rerank.timeout_secs),
            ("search.timeout_secs", self.search.timeout_secs),
            ("server.request_timeout_secs", self.server.request_timeout_secs),
        ] {
            if secs == 0 {
                return Err(AppError::config(format!("{} must be greater than zero", key)));
            }
        }

        PromptSet::from_config(&self.prompts)?;
        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl EmbeddingConfig {
    /// Deadline for one embedding call, covering every retry and the
    /// backoff between attempts
    pub fn call_timeout(&self) -> Duration {
        let per_attempt = Duration::from_secs(self.timeout_secs);
        (1..=self.max_retries).fold(
            per_attempt.saturating_mul(self.max_retries.saturating_add(1)),
            |total, attempt| total.saturating_add(crate::embeddings::retry_backoff(attempt)),
        )
    }
}

fn require(value: &Option<String>, key: &str) -> Result<()> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(AppError::config(format!("{} is required", key))),
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

impl DatabaseConfig {
    /// Configuration for a URL with default pool settings
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: 0,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            api_base: default_llm_api_base(),
            expansion_model: default_expansion_model(),
            generation_model: default_generation_model(),
            expansion_temperature: default_expansion_temperature(),
            generation_temperature: default_generation_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
            stream_idle_timeout_secs: default_stream_idle_timeout(),
        }
    }
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: default_rerank_provider(),
            api_key: None,
            api_base: default_rerank_api_base(),
            model: default_rerank_model(),
            top_k: default_top_k(),
            timeout_secs: default_rerank_timeout(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: default_search_backend(),
            rpc_url: None,
            rpc_api_key: None,
            function: default_search_function(),
            match_count: default_match_count(),
            full_text_weight: default_weight(),
            semantic_weight: default_weight(),
            rrf_k: default_rrf_k(),
            timeout_secs: default_search_timeout(),
            isolate_failures: false,
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            max_chars: None,
        }
    }
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            expansion: default_expansion_prompt(),
            answer: default_answer_prompt(),
            abstain_phrase: default_abstain_phrase(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.embedding.provider = "mock".into();
        config.llm.provider = "mock".into();
        config.rerank.provider = "mock".into();
        config.database = Some(DatabaseConfig::with_url("postgres://localhost/docs"));
        config
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.search.match_count, 10);
        assert_eq!(config.search.full_text_weight, config.search.semantic_weight);
        assert_eq!(config.rerank.top_k, 5);
        assert!(!config.search.isolate_failures);
        assert!(config.context.max_chars.is_none());
    }

    #[test]
    fn test_mock_providers_validate() {
        assert!(mock_config().validate().is_ok());
    }

    #[test]
    fn test_missing_api_key_is_configuration_error() {
        let mut config = mock_config();
        config.llm.provider = "openai".into();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
        assert!(err.to_string().contains("llm.api_key"));
    }

    #[test]
    fn test_rpc_backend_needs_url() {
        let mut config = mock_config();
        config.search.backend = "rpc".into();
        assert!(config.validate().is_err());

        config.search.rpc_url = Some("https://db.example.com".into());
        config.search.rpc_api_key = Some("anon".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_broken_prompt_rejected() {
        let mut config = mock_config();
        config.prompts.answer = "Answer {question} without grounding".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_top_k_rejected() {
        let mut config = mock_config();
        config.rerank.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_context_cap_rejected() {
        let mut config = mock_config();
        config.context.max_chars = Some(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("context.max_chars"));

        config.context.max_chars = Some(1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let zeroed: [(&str, fn(&mut AppConfig)); 5] = [
            ("embedding.timeout_secs", |c: &mut AppConfig| c.embedding.timeout_secs = 0),
            ("llm.timeout_secs", |c: &mut AppConfig| c.llm.timeout_secs = 0),
            ("llm.stream_idle_timeout_secs", |c: &mut AppConfig| c.llm.stream_idle_timeout_secs = 0),
            ("rerank.timeout_secs", |c: &mut AppConfig| c.rerank.timeout_secs = 0),
            ("search.timeout_secs", |c: &mut AppConfig| c.search.timeout_secs = 0),
        ];

        for (key, zero) in zeroed {
            let mut config = mock_config();
            zero(&mut config);
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains(key), "{} accepted", key);
        }
    }

    #[test]
    fn test_server_timeouts() {
        let mut config = AppConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(120));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));

        config.server.shutdown_timeout_secs = 5;
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_embedding_call_timeout_covers_retries() {
        let mut embedding = EmbeddingConfig::default();
        assert_eq!(embedding.call_timeout(), Duration::from_secs(15));

        // Three attempts plus 200ms and 400ms of backoff
        embedding.max_retries = 2;
        assert_eq!(embedding.call_timeout(), Duration::from_millis(45_600));
    }
}
