//! Dependency context
//!
//! Holds the process-wide clients. Each one is built by a memoized async
//! factory on first use; concurrent first callers await the same
//! initialization.

use crate::augment::{ContextAugmenter, ContextService, HttpContextService};
use crate::generation::{ChatCompletionsBackend, GenerationBackend};
use crate::pipeline::QueryPipeline;
use crate::profile::{resolve_runtime_profile, ProfileInputs, ResolvedProfile};
use crate::retrieval::{FallbackEngine, FallbackIndex, HybridRetrievalEngine};
use crate::routing::RoutingSystem;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, warn};
use waypoint_common::cache::{RedisCache, ResponseCache};
use waypoint_common::config::AppConfig;
use waypoint_common::db::{DbPool, PgRetrievalStore, RetrievalStore};
use waypoint_common::embeddings::{create_embedder, EmbeddingProvider};
use waypoint_common::errors::Result;

/// A value computed at most once
pub struct Memo<T> {
    cell: OnceCell<T>,
    inits: AtomicUsize,
}

impl<T> Default for Memo<T> {
    fn default() -> Self {
        Self {
            cell: OnceCell::new(),
            inits: AtomicUsize::new(0),
        }
    }
}

impl<T: Clone> Memo<T> {
    /// Return the memoized value, running `init` if nobody has yet.
    /// A failed init leaves the cell empty so a later call retries.
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.cell
            .get_or_try_init(|| {
                self.inits.fetch_add(1, Ordering::SeqCst);
                init()
            })
            .await
            .cloned()
    }

    pub fn get(&self) -> Option<T> {
        self.cell.get().cloned()
    }

    /// Number of times an initializer ran
    pub fn init_count(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }
}

pub struct Dependencies {
    config: Arc<AppConfig>,
    profile: ResolvedProfile,
    routing: Arc<RoutingSystem>,
    store: Memo<Arc<dyn RetrievalStore>>,
    embedder: Memo<Arc<dyn EmbeddingProvider>>,
    fallback: Memo<Option<Arc<dyn FallbackEngine>>>,
    cache: Memo<Option<Arc<dyn ResponseCache>>>,
    context: Memo<Option<Arc<dyn ContextService>>>,
    generation: Memo<Option<Arc<dyn GenerationBackend>>>,
    engine: Memo<Arc<HybridRetrievalEngine>>,
    pipeline: Memo<Arc<QueryPipeline>>,
}

impl Dependencies {
    /// Resolve the runtime profile from config and the process environment
    pub fn new(config: Arc<AppConfig>) -> Self {
        let profile = resolve_runtime_profile(&ProfileInputs::from_config(&config));
        info!(
            profile = profile.profile.as_str(),
            fallback_enabled = profile.fallback_enabled,
            "Runtime profile resolved"
        );
        Self::with_profile(config, profile)
    }

    pub fn with_profile(config: Arc<AppConfig>, profile: ResolvedProfile) -> Self {
        Self {
            config,
            profile,
            routing: Arc::new(RoutingSystem::new()),
            store: Memo::default(),
            embedder: Memo::default(),
            fallback: Memo::default(),
            cache: Memo::default(),
            context: Memo::default(),
            generation: Memo::default(),
            engine: Memo::default(),
            pipeline: Memo::default(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn profile(&self) -> ResolvedProfile {
        self.profile
    }

    pub fn routing(&self) -> Arc<RoutingSystem> {
        self.routing.clone()
    }

    pub async fn store(&self) -> Result<Arc<dyn RetrievalStore>> {
        self.store
            .get_or_try_init(|| async {
                let pool = DbPool::new(&self.config.database).await?;
                let store = PgRetrievalStore::new(pool, self.config.database.documents_table.clone())?;
                Ok(Arc::new(store) as Arc<dyn RetrievalStore>)
            })
            .await
    }

    pub async fn embedder(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        self.embedder
            .get_or_try_init(|| async { create_embedder(&self.config.embedding) })
            .await
    }

    /// `None` unless the runtime profile allows the fallback engine
    pub async fn fallback(&self) -> Result<Option<Arc<dyn FallbackEngine>>> {
        self.fallback
            .get_or_try_init(|| async {
                if !self.profile.fallback_enabled {
                    info!(profile = self.profile.profile.as_str(), "Fallback engine disabled");
                    return Ok(None);
                }

                let path = self.config.fallback.documents_path.as_deref().map(Path::new);
                let index = match FallbackIndex::load(path).await {
                    Ok(index) => index,
                    Err(e) => {
                        warn!(error = %e, "Extra fallback documents unusable, using built-in set only");
                        FallbackIndex::builtin()
                    }
                };
                info!(documents = index.document_count(), "Fallback engine ready");
                Ok(Some(Arc::new(index) as Arc<dyn FallbackEngine>))
            })
            .await
    }

    /// `None` without a cache URL or when the cache is unreachable
    pub async fn cache(&self) -> Result<Option<Arc<dyn ResponseCache>>> {
        self.cache
            .get_or_try_init(|| async {
                if self.config.redis.url.is_none() {
                    return Ok(None);
                }
                match RedisCache::connect(&self.config.redis).await {
                    Ok(cache) => {
                        info!("Response cache connected");
                        Ok(Some(Arc::new(cache) as Arc<dyn ResponseCache>))
                    }
                    Err(e) => {
                        warn!(error = %e, "Response cache unavailable, continuing without cache");
                        Ok(None)
                    }
                }
            })
            .await
    }

    pub async fn context_service(&self) -> Result<Option<Arc<dyn ContextService>>> {
        self.context
            .get_or_try_init(|| async {
                let cfg = &self.config.context_service;
                let Some(url) = cfg.url.as_deref().filter(|u| !u.trim().is_empty()) else {
                    return Ok(None);
                };
                let service = HttpContextService::new(url, Duration::from_millis(cfg.timeout_ms))?;
                Ok(Some(Arc::new(service) as Arc<dyn ContextService>))
            })
            .await
    }

    pub async fn generation(&self) -> Result<Option<Arc<dyn GenerationBackend>>> {
        self.generation
            .get_or_try_init(|| async {
                if !self.config.generation_configured() {
                    info!("No generation API key, CLOUD answers fall back to retrieval");
                    return Ok(None);
                }
                let backend = ChatCompletionsBackend::new(&self.config.generation)?;
                Ok(Some(Arc::new(backend) as Arc<dyn GenerationBackend>))
            })
            .await
    }

    pub async fn engine(&self) -> Result<Arc<HybridRetrievalEngine>> {
        self.engine
            .get_or_try_init(|| async {
                let engine = HybridRetrievalEngine::new(
                    self.store().await?,
                    self.embedder().await?,
                    self.fallback().await?,
                    self.profile.profile.as_str(),
                );
                Ok(Arc::new(engine))
            })
            .await
    }

    pub async fn pipeline(&self) -> Result<Arc<QueryPipeline>> {
        self.pipeline
            .get_or_try_init(|| async {
                let augmenter = ContextAugmenter::new(self.context_service().await?, &self.config.context_service);
                let pipeline = QueryPipeline::new(
                    self.routing(),
                    self.engine().await?,
                    Arc::new(augmenter),
                    self.generation().await?,
                    self.cache().await?,
                    self.config.retrieval.clone(),
                    &self.config.generation,
                );
                Ok(Arc::new(pipeline))
            })
            .await
    }
}
