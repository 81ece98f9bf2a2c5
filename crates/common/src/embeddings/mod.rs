//! Embedding provider abstraction
//!
//! Provides a unified interface for turning query text into vectors:
//! - OpenAI-compatible `/embeddings` endpoints
//! - A deterministic hash-derived embedder used when no trained model is reachable
//!
//! Callers only see [`EmbeddingProvider`], so providers are swappable.

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Trait for embedding generation
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// OpenAI-compatible embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    input: Vec<&'a str>,
    model: &'a str,
    dimensions: usize,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder
    pub fn new(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            max_retries: config.max_retries,
        })
    }

    /// Make request with exponential backoff on transient failures
    async fn request_with_retry(&self, text: &str) -> Result<Vec<f32>> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        let attempt = AtomicU32::new(0);
        let max_retries = self.max_retries;

        backoff::future::retry_notify(
            policy,
            || {
                let n = attempt.fetch_add(1, Ordering::Relaxed);
                async move {
                    self.make_request(text).await.map_err(|e| {
                        if n < max_retries && is_transient(&e) {
                            backoff::Error::transient(e)
                        } else {
                            backoff::Error::permanent(e)
                        }
                    })
                }
            },
            |e: AppError, wait: Duration| {
                tracing::warn!(
                    error = %e,
                    retry_in_ms = wait.as_millis() as u64,
                    "Embedding request failed, retrying"
                );
            },
        )
        .await
    }

    async fn make_request(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = OpenAIRequest {
            input: vec![text],
            model: &self.model,
            dimensions: self.dimension,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(AppError::ServiceUnavailable {
                    message: format!("Embedding API {}: {}", status, body),
                });
            }
            return Err(AppError::EmbeddingError {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: OpenAIResponse = response.json().await.map_err(|e| AppError::EmbeddingError {
            message: format!("Failed to parse response: {}", e),
        })?;

        result
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| AppError::EmbeddingError {
                message: "Empty response".to_string(),
            })
    }
}

fn is_transient(err: &AppError) -> bool {
    match err {
        AppError::HttpClient(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        AppError::ServiceUnavailable { .. } => true,
        _ => false,
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let start = std::time::Instant::now();
        let result = self.request_with_retry(text).await;
        crate::metrics::record_stage(
            "embedding",
            start.elapsed().as_secs_f64(),
            result.as_ref().err().map(|_| "error"),
        );
        result
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic pseudo-embedding derived from token hashes.
///
/// Each token is hashed into a signed bucket, so texts sharing vocabulary land
/// close together under cosine similarity. Output is L2-normalized.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let normalized = text.to_lowercase();

        let tokens: Vec<&str> = normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        for token in &tokens {
            let digest = Sha256::digest(token.as_bytes());
            // Two buckets per token reduce collision damage
            for pair in digest.chunks(4).take(2) {
                let raw = u32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]);
                let bucket = (raw as usize) % self.dimension;
                let sign = if raw & 0x8000_0000 == 0 { 1.0 } else { -1.0 };
                vector[bucket] += sign;
            }
        }

        if tokens.is_empty() {
            // Whole-text digest so that empty-token input still yields a stable vector
            let digest = Sha256::digest(normalized.as_bytes());
            for (i, slot) in vector.iter_mut().enumerate() {
                let byte = digest[i % digest.len()] as f32;
                *slot = (byte * (i as f32 + 1.0)).sin();
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    /// Stable identifier of the text, used in logs and cache keys
    pub fn fingerprint(text: &str) -> String {
        hex::encode(&Sha256::digest(text.as_bytes())[..8])
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    fn model_name(&self) -> &str {
        "hash-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedding provider based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "embedding.api_key is required for the openai provider".to_string(),
            })?;
            Ok(Arc::new(OpenAIEmbedder::new(config, key)?))
        }
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dimension))),
        other => {
            tracing::warn!(provider = other, "Unknown embedding provider, using hash embedder");
            Ok(Arc::new(HashEmbedder::new(config.dimension)))
        }
    }
}

/// Cosine similarity of two equally sized vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}
