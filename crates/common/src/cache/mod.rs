//! Redis response cache
//!
//! Provides:
//! - The [`ResponseCache`] seam used by the query pipeline
//! - A Redis implementation over a multiplexed connection
//! - Deterministic key builders

use crate::config::RedisConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

/// Key/value cache holding serialized responses
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Raw payload stored under `key`
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;

    /// Store `payload` under `key` for `ttl_secs`
    async fn set_raw(&self, key: &str, payload: String, ttl_secs: u64) -> Result<()>;

    /// TTL used when the caller has no preference
    fn default_ttl_secs(&self) -> u64;

    /// Connectivity probe
    async fn ping(&self) -> Result<()>;
}

/// Typed read through a [`ResponseCache`]
pub async fn get_json<T: DeserializeOwned>(cache: &dyn ResponseCache, key: &str) -> Result<Option<T>> {
    match cache.get_raw(key).await? {
        Some(json) => {
            let parsed = serde_json::from_str(&json).map_err(|e| AppError::CacheError {
                message: format!("Failed to parse cached value: {}", e),
            })?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Typed write through a [`ResponseCache`] with its default TTL
pub async fn set_json<T: Serialize>(cache: &dyn ResponseCache, key: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string(value).map_err(|e| AppError::CacheError {
        message: format!("Failed to serialize value: {}", e),
    })?;
    cache.set_raw(key, json, cache.default_ttl_secs()).await
}

/// Redis cache client
pub struct RedisCache {
    connection: RwLock<MultiplexedConnection>,
    key_prefix: String,
    default_ttl_secs: u64,
}

impl RedisCache {
    /// Connect using the `redis` config section; fails when no URL is configured
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let url = config.url.as_deref().ok_or_else(|| AppError::Configuration {
            message: "redis.url is not set".to_string(),
        })?;

        let client = Client::open(url).map_err(|e| AppError::CacheError {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection: RwLock::new(connection),
            key_prefix: config.key_prefix.clone(),
            default_ttl_secs: config.default_ttl_secs,
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl ResponseCache for RedisCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let value: Option<String> = conn.get(&full_key).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to get key '{}': {}", full_key, e),
        })?;

        debug!(key = %full_key, hit = value.is_some(), "Cache lookup");
        Ok(value)
    }

    async fn set_raw(&self, key: &str, payload: String, ttl_secs: u64) -> Result<()> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        conn.set_ex::<_, _, ()>(&full_key, payload, ttl_secs)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to set key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, ttl_secs, "Cache set");
        Ok(())
    }

    fn default_ttl_secs(&self) -> u64 {
        self.default_ttl_secs
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }
}

/// Cache key builder helpers
pub mod keys {
    use sha2::{Digest, Sha256};

    /// Key for a pipeline response. Every field that changes the answer is hashed.
    pub fn response(
        mode: &str,
        query: &str,
        category: Option<&str>,
        max_results: usize,
        threshold: f32,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(mode.as_bytes());
        hasher.update([0u8]);
        hasher.update(query.trim().as_bytes());
        hasher.update([0u8]);
        hasher.update(category.unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(max_results.to_le_bytes());
        hasher.update(threshold.to_bits().to_le_bytes());
        format!("response:{}:{}", mode.to_lowercase(), hex::encode(hasher.finalize()))
    }
}
