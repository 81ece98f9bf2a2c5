//! Context augmentation
//!
//! Fetches auxiliary snippets and a system-context summary before
//! generation. Augmentation is best effort: every failure comes back as an
//! error for the caller to trace, never as a pipeline abort.

use crate::stage::{run_stage, CancelSignal};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use waypoint_common::config::ContextServiceConfig;
use waypoint_common::errors::{AppError, Result};
use waypoint_common::metrics;

/// Most snippets merged into one prompt
pub const MAX_SNIPPETS: usize = 3;
/// Per-snippet size limit in characters
pub const SNIPPET_CHAR_LIMIT: usize = 1500;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRequest {
    pub query: String,
    pub max_files: usize,
    pub include_system_context: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPayload {
    #[serde(default)]
    pub files: Vec<ContextFile>,
    #[serde(default)]
    pub system_context: Option<String>,
}

/// Remote source of auxiliary context
#[async_trait]
pub trait ContextService: Send + Sync {
    async fn fetch(&self, request: &ContextRequest) -> Result<ContextPayload>;
}

/// JSON-over-HTTP context service client
pub struct HttpContextService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpContextService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/context", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl ContextService for HttpContextService {
    async fn fetch(&self, request: &ContextRequest) -> Result<ContextPayload> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::connectivity("context-service", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Augmentation {
                message: format!("context service returned {}: {}", status, body),
            });
        }

        response.json().await.map_err(|e| AppError::Augmentation {
            message: format!("Failed to parse context response: {}", e),
        })
    }
}

/// One snippet ready for the prompt
#[derive(Debug, Clone, Serialize)]
pub struct Snippet {
    pub source: String,
    pub content: String,
}

/// Successful augmentation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Augmentation {
    pub snippets: Vec<Snippet>,
    pub system_context: Option<String>,
}

pub struct ContextAugmenter {
    service: Option<Arc<dyn ContextService>>,
    max_files: usize,
    timeout: Duration,
}

impl ContextAugmenter {
    pub fn new(service: Option<Arc<dyn ContextService>>, config: &ContextServiceConfig) -> Self {
        Self {
            service,
            max_files: config.max_files.clamp(1, MAX_SNIPPETS),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Augmenter with no service; every call fails
    pub fn disabled() -> Self {
        Self::new(None, &ContextServiceConfig::default())
    }

    pub fn is_available(&self) -> bool {
        self.service.is_some()
    }

    #[instrument(skip_all)]
    pub async fn augment(&self, query: &str, cancel: &CancelSignal) -> Result<Augmentation> {
        let result = self.fetch(query, cancel).await;
        metrics::record_augmentation(result.is_ok());
        result
    }

    async fn fetch(&self, query: &str, cancel: &CancelSignal) -> Result<Augmentation> {
        let service = self.service.as_ref().ok_or_else(|| AppError::Augmentation {
            message: "context service not configured".to_string(),
        })?;

        let request = ContextRequest {
            query: query.to_string(),
            max_files: self.max_files,
            include_system_context: true,
        };

        let payload = run_stage("augmentation", self.timeout, cancel, service.fetch(&request)).await?;

        let snippets: Vec<Snippet> = payload
            .files
            .into_iter()
            .filter(|f| !f.content.trim().is_empty())
            .take(self.max_files)
            .map(|f| Snippet {
                source: f.path,
                content: truncate_chars(&f.content, SNIPPET_CHAR_LIMIT),
            })
            .collect();

        let system_context = payload.system_context.filter(|s| !s.trim().is_empty());

        if snippets.is_empty() && system_context.is_none() {
            return Err(AppError::Augmentation {
                message: "context service returned nothing".to_string(),
            });
        }

        debug!(snippets = snippets.len(), "Context augmentation succeeded");
        Ok(Augmentation {
            snippets,
            system_context,
        })
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
