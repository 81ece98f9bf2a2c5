//! Configuration management for Waypoint services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Primary store (PostgreSQL + pgvector)
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Response cache (optional)
    #[serde(default)]
    pub redis: RedisConfig,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Generation backend configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Context service used for augmentation
    #[serde(default)]
    pub context_service: ContextServiceConfig,

    /// Runtime profile inputs
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// In-process fallback index
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Request defaults for retrieval
    #[serde(default)]
    pub retrieval: RetrievalConfig,

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

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary store URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Table holding the searchable documents
    #[serde(default = "default_documents_table")]
    pub documents_table: String,

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
pub struct RedisConfig {
    /// Redis URL; caching is disabled when unset
    pub url: Option<String>,

    /// Default TTL in seconds
    #[serde(default = "default_redis_ttl")]
    pub default_ttl_secs: u64,

    /// Key prefix for namespacing
    #[serde(default = "default_cache_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, hash
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

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Chat completions endpoint
    #[serde(default = "default_generation_endpoint")]
    pub endpoint: String,

    /// API key; generation is unavailable when unset
    pub api_key: Option<String>,

    /// Model name
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Confidence reported when the backend omits one
    #[serde(default = "default_generation_confidence")]
    pub default_confidence: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContextServiceConfig {
    /// Base URL; augmentation is unavailable when unset
    pub url: Option<String>,

    /// Request timeout in milliseconds
    #[serde(default = "default_context_timeout")]
    pub timeout_ms: u64,

    /// Maximum number of snippets to fetch
    #[serde(default = "default_context_max_files")]
    pub max_files: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Explicit profile: auto, managed, local
    #[serde(default = "default_runtime_profile")]
    pub profile: String,
    /// Deployment environment name, seeded from `APP_ENV`
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Hosted platform marker, seeded from `VERCEL=1`
    #[serde(default)]
    pub vercel: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FallbackConfig {
    /// Force the fallback engine on or off regardless of profile
    pub enabled: Option<bool>,

    /// Extra documents (JSON array) loaded into the fallback index
    pub documents_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Results returned when the request omits maxResults
    #[serde(default = "default_max_results")]
    pub default_max_results: usize,

    /// Similarity threshold when the request omits one
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// OpenTelemetry endpoint
    pub otel_endpoint: Option<String>,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second
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
fn default_request_timeout() -> u64 { 30 }
fn default_database_url() -> String { "postgres://localhost/waypoint".to_string() }
fn default_documents_table() -> String { "command_documents".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 5 }
fn default_idle_timeout() -> u64 { 300 }
fn default_redis_ttl() -> u64 { 300 }
fn default_cache_prefix() -> String { "waypoint".to_string() }
fn default_embedding_provider() -> String { "hash".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 384 }
fn default_embedding_timeout() -> u64 { 10 }
fn default_embedding_retries() -> u32 { 3 }
fn default_generation_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_generation_model() -> String { "gpt-4o-mini".to_string() }
fn default_generation_timeout() -> u64 { 30 }
fn default_max_tokens() -> usize { 1000 }
fn default_temperature() -> f32 { 0.3 }
fn default_generation_confidence() -> f32 { 0.75 }
fn default_context_timeout() -> u64 { 2000 }
fn default_context_max_files() -> usize { 3 }
fn default_runtime_profile() -> String { "auto".to_string() }
fn default_environment() -> String { "development".to_string() }
fn default_max_results() -> usize { 5 }
fn default_threshold() -> f32 { 0.5 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "waypoint".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| default_environment());
        let vercel = std::env::var("VERCEL").is_ok_and(|v| v == "1");

        let config = Config::builder()
            // Deployment markers, lowest precedence
            .set_default("runtime.environment", env.clone())?
            .set_default("runtime.vercel", vercel)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Whether generation can be attempted at all
    pub fn generation_configured(&self) -> bool {
        self.generation
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            documents_table: default_documents_table(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            default_ttl_secs: default_redis_ttl(),
            key_prefix: default_cache_prefix(),
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
            max_retries: default_embedding_retries(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_generation_endpoint(),
            api_key: None,
            model: default_generation_model(),
            timeout_secs: default_generation_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            default_confidence: default_generation_confidence(),
        }
    }
}

impl Default for ContextServiceConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_context_timeout(),
            max_files: default_context_max_files(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            profile: default_runtime_profile(),
            environment: default_environment(),
            vercel: false,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_max_results: default_max_results(),
            default_threshold: default_threshold(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            otel_endpoint: None,
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

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            context_service: ContextServiceConfig::default(),
            runtime: RuntimeConfig::default(),
            fallback: FallbackConfig::default(),
            retrieval: RetrievalConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}
