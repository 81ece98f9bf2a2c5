//! Waypoint Common Library
//!
//! Shared code for the Waypoint crates including:
//! - Configuration management
//! - Error types and handling
//! - Metrics and observability
//! - Embedding provider abstraction
//! - Primary store client
//! - Response cache

pub mod cache;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod metrics;

// Re-export commonly used types
pub use cache::{RedisCache, ResponseCache};
pub use config::AppConfig;
pub use db::{DbPool, PgRetrievalStore, RetrievalStore, TextRow, VectorRow};
pub use embeddings::{EmbeddingProvider, HashEmbedder};
pub use errors::{AppError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
