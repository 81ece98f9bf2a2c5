//! Primary → fallback retrieval chain
//!
//! Vector search, then text search against the same store, then the
//! fallback index when it exists. Every stage is raced against the mode's
//! per-stage budget and the request's cancel signal.

use super::{
    finalize_items, AttemptOutcome, EngineKind, FallbackEngine, HybridMetadata, HybridResponse,
    RetrievalAttempt, RetrievalItem, RetrievalQuery, RetrievalStage, RetrievalStats,
    RetrievalStatsSnapshot, FALLBACK_CONFIDENCE, TEXT_CONFIDENCE, VECTOR_CONFIDENCE,
};
use crate::stage::{run_stage, CancelSignal};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use waypoint_common::db::RetrievalStore;
use waypoint_common::embeddings::EmbeddingProvider;
use waypoint_common::errors::{AppError, Result};
use waypoint_common::metrics;

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_CATEGORY: &str = "general";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EngineHealth {
    pub primary_available: bool,
    pub fallback_available: bool,
    pub overall: bool,
}

/// Bookkeeping for one pass through the chain
#[derive(Default)]
struct ChainRun {
    attempts: Vec<RetrievalAttempt>,
    reasons: Vec<String>,
}

impl ChainRun {
    fn record(&mut self, stage: RetrievalStage, outcome: AttemptOutcome, rows: usize, detail: Option<String>) {
        self.attempts.push(RetrievalAttempt {
            stage,
            outcome,
            rows,
            detail,
        });
    }

    fn empty(&mut self, stage: RetrievalStage) {
        self.reasons.push(format!("{} returned no rows", stage.as_str()));
        self.record(stage, AttemptOutcome::Empty, 0, None);
    }

    fn failed(&mut self, stage: RetrievalStage, err: &AppError) {
        if err.advances_chain() {
            warn!(stage = stage.as_str(), error = %err, "Retrieval stage failed");
        } else {
            error!(stage = stage.as_str(), error = %err, "Retrieval stage failed unexpectedly");
        }
        self.reasons.push(format!("{} failed: {}", stage.as_str(), err));
        self.record(stage, AttemptOutcome::Failed, 0, Some(err.to_string()));
    }

    fn reason(&self) -> Option<String> {
        (!self.reasons.is_empty()).then(|| self.reasons.join("; "))
    }
}

/// Stage output, with no rows surfacing as [`AppError::EmptyResult`]
fn require_rows(stage: RetrievalStage, items: Vec<RetrievalItem>) -> Result<Vec<RetrievalItem>> {
    if items.is_empty() {
        Err(AppError::EmptyResult {
            stage: stage.as_str().to_string(),
        })
    } else {
        Ok(items)
    }
}

/// Stage result after timeout/cancellation handling
enum Step {
    Hit(Vec<RetrievalItem>),
    Miss,
    Cancelled,
}

pub struct HybridRetrievalEngine {
    store: Arc<dyn RetrievalStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    fallback: Option<Arc<dyn FallbackEngine>>,
    environment: String,
    stats: RetrievalStats,
}

impl HybridRetrievalEngine {
    pub fn new(
        store: Arc<dyn RetrievalStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        fallback: Option<Arc<dyn FallbackEngine>>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            fallback,
            environment: environment.into(),
            stats: RetrievalStats::default(),
        }
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn stats(&self) -> RetrievalStatsSnapshot {
        self.stats.snapshot()
    }

    /// A request answered from the response cache without running the chain
    pub fn record_cache_hit(&self) {
        self.stats.record_cache_hit();
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Run the retrieval chain. Never fails: an exhausted chain comes back
    /// as `success=false, engine=none` with the reason in metadata.
    #[instrument(skip_all, fields(max_results = q.max_results, force_fallback = q.force_fallback))]
    pub async fn search(&self, q: &RetrievalQuery, budget: Duration, cancel: &CancelSignal) -> HybridResponse {
        let start = Instant::now();
        self.stats.record_query();
        let mut run = ChainRun::default();

        if q.force_fallback {
            match &self.fallback {
                Some(fallback) => {
                    run.reasons.push("fallback forced by request".to_string());
                    return self.fallback_stage(fallback.as_ref(), q, budget, cancel, run, start).await;
                }
                None => warn!("forceFallback requested without a fallback engine, ignoring"),
            }
        }

        let vector = run_stage(
            RetrievalStage::VectorSearch.as_str(),
            budget,
            cancel,
            self.vector_search(q),
        )
        .await;
        match self.settle(RetrievalStage::VectorSearch, vector, &mut run) {
            Step::Hit(items) => return self.done_primary(items, VECTOR_CONFIDENCE, run, start, q),
            Step::Cancelled => return self.done_none(run, start, false),
            Step::Miss => {}
        }

        let text = run_stage(
            RetrievalStage::TextSearch.as_str(),
            budget,
            cancel,
            self.text_search(q),
        )
        .await;
        match self.settle(RetrievalStage::TextSearch, text, &mut run) {
            Step::Hit(items) => return self.done_primary(items, TEXT_CONFIDENCE, run, start, q),
            Step::Cancelled => return self.done_none(run, start, false),
            Step::Miss => {}
        }

        match &self.fallback {
            Some(fallback) => self.fallback_stage(fallback.as_ref(), q, budget, cancel, run, start).await,
            None => {
                run.reasons.push("fallback engine not available".to_string());
                self.done_none(run, start, false)
            }
        }
    }

    fn settle(&self, stage: RetrievalStage, result: Result<Vec<RetrievalItem>>, run: &mut ChainRun) -> Step {
        match result {
            Ok(items) => {
                run.record(stage, AttemptOutcome::Succeeded, items.len(), None);
                Step::Hit(items)
            }
            Err(AppError::EmptyResult { .. }) => {
                run.empty(stage);
                Step::Miss
            }
            Err(AppError::Cancelled { .. }) => {
                info!(stage = stage.as_str(), "Retrieval cancelled");
                run.reasons.push(format!("{} cancelled", stage.as_str()));
                run.record(stage, AttemptOutcome::Failed, 0, Some("cancelled".to_string()));
                Step::Cancelled
            }
            Err(e) => {
                run.failed(stage, &e);
                Step::Miss
            }
        }
    }

    async fn vector_search(&self, q: &RetrievalQuery) -> Result<Vec<RetrievalItem>> {
        let embedding = self.embedder.embed(&q.query).await?;
        let rows = self
            .store
            .similarity_search(&embedding, q.threshold, q.max_results, q.category.as_deref())
            .await?;

        let items = rows
            .into_iter()
            .map(|row| RetrievalItem {
                id: row.id,
                content: row.content,
                command: None,
                description: None,
                category: row.category.unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
                score: row.similarity,
            })
            .collect();
        require_rows(RetrievalStage::VectorSearch, items)
    }

    async fn text_search(&self, q: &RetrievalQuery) -> Result<Vec<RetrievalItem>> {
        let rows = self
            .store
            .text_search(&q.query, q.max_results, q.category.as_deref())
            .await?;

        // Ranks are relative; the best full-text hit scores 1.0
        let max_rank = rows
            .iter()
            .filter_map(|r| r.rank)
            .fold(0.0f32, f32::max);

        let items = rows
            .into_iter()
            .map(|row| {
                let score = match row.rank {
                    Some(rank) if max_rank > 0.0 => rank / max_rank,
                    _ => 0.5,
                };
                RetrievalItem {
                    id: row.id,
                    content: row.content,
                    command: None,
                    description: None,
                    category: row.category.unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
                    score,
                }
            })
            .collect();
        require_rows(RetrievalStage::TextSearch, items)
    }

    async fn fallback_stage(
        &self,
        fallback: &dyn FallbackEngine,
        q: &RetrievalQuery,
        budget: Duration,
        cancel: &CancelSignal,
        mut run: ChainRun,
        start: Instant,
    ) -> HybridResponse {
        // A signal that is already cancelled resolves the stage without polling it
        let invoked = AtomicBool::new(false);
        let search = async {
            invoked.store(true, Ordering::Relaxed);
            let items = fallback.search(&q.query, q.max_results, q.category.as_deref()).await?;
            require_rows(RetrievalStage::FallbackSearch, items)
        };

        let result = run_stage(RetrievalStage::FallbackSearch.as_str(), budget, cancel, search).await;
        let invoked = invoked.load(Ordering::Relaxed);
        if invoked {
            self.stats.record_fallback_invocation();
        }

        match self.settle(RetrievalStage::FallbackSearch, result, &mut run) {
            Step::Hit(items) => {
                metrics::record_fallback(true);
                self.stats.record_fallback_success();
                let results = finalize_items(items, q.max_results);
                info!(results = results.len(), "Served from fallback index");
                self.respond(true, results, EngineKind::Fallback, FALLBACK_CONFIDENCE, true, run, start)
            }
            Step::Miss | Step::Cancelled if invoked => {
                metrics::record_fallback(false);
                self.done_none(run, start, true)
            }
            Step::Miss | Step::Cancelled => self.done_none(run, start, false),
        }
    }

    fn done_primary(
        &self,
        items: Vec<RetrievalItem>,
        confidence: f32,
        mut run: ChainRun,
        start: Instant,
        q: &RetrievalQuery,
    ) -> HybridResponse {
        self.stats.record_primary_success();
        let results = finalize_items(items, q.max_results);
        debug!(results = results.len(), confidence, "Served from primary store");
        // Earlier primary misses are visible in the attempts; no fallback happened
        run.reasons.clear();
        self.respond(true, results, EngineKind::PrimaryStore, confidence, false, run, start)
    }

    fn done_none(&self, run: ChainRun, start: Instant, fallback_used: bool) -> HybridResponse {
        self.stats.record_failure();
        warn!(reason = ?run.reason(), fallback_used, "Retrieval chain exhausted");
        self.respond(false, Vec::new(), EngineKind::None, 0.0, fallback_used, run, start)
    }

    #[allow(clippy::too_many_arguments)]
    fn respond(
        &self,
        success: bool,
        results: Vec<RetrievalItem>,
        engine: EngineKind,
        confidence: f32,
        fallback_used: bool,
        run: ChainRun,
        start: Instant,
    ) -> HybridResponse {
        HybridResponse {
            success,
            engine,
            processing_time: start.elapsed().as_millis() as u64,
            confidence: confidence.clamp(0.0, 1.0),
            fallback_used,
            metadata: HybridMetadata {
                total_results: results.len(),
                primary_engine: EngineKind::PrimaryStore.as_str().to_string(),
                fallback_reason: run.reason(),
                environment: self.environment.clone(),
            },
            results,
            attempts: run.attempts,
        }
    }

    /// Probe the primary store and report fallback availability
    pub async fn health_check(&self) -> EngineHealth {
        let primary_available = matches!(
            tokio::time::timeout(HEALTH_PROBE_TIMEOUT, self.store.ping()).await,
            Ok(Ok(()))
        );
        let fallback_available = self
            .fallback
            .as_ref()
            .is_some_and(|f| f.document_count() > 0);

        EngineHealth {
            primary_available,
            fallback_available,
            overall: primary_available || fallback_available,
        }
    }
}
