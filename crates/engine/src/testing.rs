//! In-memory doubles for the engine's collaborators

use crate::augment::{ContextFile, ContextPayload, ContextRequest, ContextService};
use crate::generation::{GenerationBackend, GenerationOutput, GenerationRequest};
use crate::retrieval::{FallbackEngine, RetrievalItem};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use waypoint_common::cache::ResponseCache;
use waypoint_common::db::{RetrievalStore, TextRow, VectorRow};
use waypoint_common::embeddings::EmbeddingProvider;
use waypoint_common::errors::{AppError, Result};

/// How a fake call behaves
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Return this many rows
    Rows(usize),
    /// Fail with a connectivity error
    Fail,
    /// Never return
    Hang,
}

async fn act(behavior: Behavior, delay: Duration, service: &str) -> Result<usize> {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    match behavior {
        Behavior::Rows(n) => Ok(n),
        Behavior::Fail => Err(AppError::connectivity(service, "connection refused")),
        Behavior::Hang => std::future::pending().await,
    }
}

pub struct FakeStore {
    pub vector: Behavior,
    pub text: Behavior,
    pub ping_ok: bool,
    pub delay: Duration,
    pub vector_calls: AtomicUsize,
    pub text_calls: AtomicUsize,
}

impl FakeStore {
    pub fn new(vector: Behavior, text: Behavior) -> Self {
        Self {
            vector,
            text,
            ping_ok: true,
            delay: Duration::ZERO,
            vector_calls: AtomicUsize::new(0),
            text_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn down() -> Self {
        Self {
            ping_ok: false,
            ..Self::new(Behavior::Fail, Behavior::Fail)
        }
    }

    pub fn vector_calls(&self) -> usize {
        self.vector_calls.load(Ordering::SeqCst)
    }

    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetrievalStore for FakeStore {
    async fn similarity_search(
        &self,
        _embedding: &[f32],
        _threshold: f32,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<VectorRow>> {
        self.vector_calls.fetch_add(1, Ordering::SeqCst);
        let n = act(self.vector, self.delay, "primary-store").await?;
        // Alternate categories so filtering is observable
        Ok((0..n)
            .map(|i| VectorRow {
                id: format!("vec-{}", i),
                content: format!("vector document {}", i),
                category: Some(if i % 2 == 0 { "system" } else { "network" }.to_string()),
                similarity: 0.95 - i as f32 * 0.05,
            })
            .filter(|row| category.map_or(true, |c| row.category.as_deref() == Some(c)))
            .take(limit)
            .collect())
    }

    async fn text_search(&self, _query: &str, limit: usize, category: Option<&str>) -> Result<Vec<TextRow>> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        let n = act(self.text, self.delay, "primary-store").await?;
        Ok((0..n.min(limit))
            .map(|i| TextRow {
                id: format!("txt-{}", i),
                content: format!("text document {}", i),
                category: category.map(str::to_string),
                rank: Some(0.1 / (i as f32 + 1.0)),
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        if self.ping_ok {
            Ok(())
        } else {
            Err(AppError::connectivity("primary-store", "connection refused"))
        }
    }
}

pub struct FakeFallback {
    pub behavior: Behavior,
    pub calls: AtomicUsize,
}

impl FakeFallback {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FallbackEngine for FakeFallback {
    async fn search(&self, _query: &str, limit: usize, category: Option<&str>) -> Result<Vec<RetrievalItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = act(self.behavior, Duration::ZERO, "fallback-index").await?;
        Ok((0..n.min(limit))
            .map(|i| RetrievalItem {
                id: format!("fb-{}", i),
                content: format!("fallback document {}", i),
                command: Some(format!("cmd-{}", i)),
                description: Some(format!("does thing {}", i)),
                category: category.unwrap_or("general").to_string(),
                score: 0.8 - i as f32 * 0.1,
            })
            .collect())
    }

    fn document_count(&self) -> usize {
        match self.behavior {
            Behavior::Rows(n) => n,
            _ => 1,
        }
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(AppError::EmbeddingError {
            message: "model offline".into(),
        })
    }

    fn model_name(&self) -> &str {
        "failing"
    }

    fn dimension(&self) -> usize {
        8
    }
}

pub struct FakeContextService {
    pub files: usize,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl FakeContextService {
    pub fn new(files: usize) -> Self {
        Self {
            files,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            fail: true,
            ..Self::new(0)
        }
    }
}

#[async_trait]
impl ContextService for FakeContextService {
    async fn fetch(&self, request: &ContextRequest) -> Result<ContextPayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::connectivity("context-service", "rejected"));
        }
        Ok(ContextPayload {
            files: (0..self.files.min(request.max_files + 2))
                .map(|i| ContextFile {
                    path: format!("docs/runbook-{}.md", i),
                    content: "x".repeat(2000),
                })
                .collect(),
            system_context: Some("3 servers online".into()),
        })
    }
}

pub struct FakeGeneration {
    pub fail: bool,
    pub confidence: Option<f32>,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeGeneration {
    pub fn ok() -> Self {
        Self {
            fail: false,
            confidence: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::ok()
        }
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl GenerationBackend for FakeGeneration {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if self.fail {
            return Err(AppError::Generation {
                message: "upstream returned 500".into(),
            });
        }
        Ok(GenerationOutput {
            text: "generated answer".into(),
            confidence: self.confidence,
            model: "fake-model".into(),
            tokens_used: 42,
        })
    }

    fn model(&self) -> &str {
        "fake-model"
    }
}

#[derive(Default)]
pub struct MemoryCache {
    pub entries: Mutex<HashMap<String, String>>,
    pub fail: bool,
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        if self.fail {
            return Err(AppError::CacheError {
                message: "cache down".into(),
            });
        }
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set_raw(&self, key: &str, payload: String, _ttl_secs: u64) -> Result<()> {
        if self.fail {
            return Err(AppError::CacheError {
                message: "cache down".into(),
            });
        }
        self.entries.lock().unwrap().insert(key.to_string(), payload);
        Ok(())
    }

    fn default_ttl_secs(&self) -> u64 {
        60
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
