//! Query pipeline
//!
//! Request → routing → hybrid retrieval → (augmentation, generation for the
//! CLOUD family) → composition. Always returns a [`UnifiedResponse`].

use crate::augment::{Augmentation, ContextAugmenter};
use crate::composer::{Composition, ResponseComposer, Trace, UnifiedResponse};
use crate::generation::{build_request, GenerationBackend, GenerationOutput};
use crate::request::QueryRequest;
use crate::retrieval::{HybridResponse, HybridRetrievalEngine, RetrievalItem, RetrievalQuery};
use crate::routing::{validate_and_normalize_mode, CanonicalMode, RoutingDecision, RoutingSystem};
use crate::stage::{run_stage, CancelSignal};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use waypoint_common::cache::{self, keys, ResponseCache};
use waypoint_common::config::{GenerationConfig, RetrievalConfig};
use waypoint_common::metrics;

const RESPONSE_CACHE: &str = "responses";

pub struct QueryPipeline {
    routing: Arc<RoutingSystem>,
    engine: Arc<HybridRetrievalEngine>,
    augmenter: Arc<ContextAugmenter>,
    generation: Option<Arc<dyn GenerationBackend>>,
    cache: Option<Arc<dyn ResponseCache>>,
    composer: ResponseComposer,
    defaults: RetrievalConfig,
    generation_timeout: Duration,
}

impl QueryPipeline {
    pub fn new(
        routing: Arc<RoutingSystem>,
        engine: Arc<HybridRetrievalEngine>,
        augmenter: Arc<ContextAugmenter>,
        generation: Option<Arc<dyn GenerationBackend>>,
        cache: Option<Arc<dyn ResponseCache>>,
        defaults: RetrievalConfig,
        generation_config: &GenerationConfig,
    ) -> Self {
        Self {
            routing,
            engine,
            augmenter,
            generation,
            cache,
            composer: ResponseComposer::new(generation_config.default_confidence),
            defaults,
            generation_timeout: Duration::from_secs(generation_config.timeout_secs),
        }
    }

    pub fn routing(&self) -> &RoutingSystem {
        &self.routing
    }

    pub fn engine(&self) -> &HybridRetrievalEngine {
        &self.engine
    }

    pub async fn execute(&self, request: QueryRequest) -> UnifiedResponse {
        self.execute_with_cancel(request, CancelSignal::never()).await
    }

    #[instrument(skip_all, fields(mode = ?request.mode))]
    pub async fn execute_with_cancel(&self, request: QueryRequest, cancel: CancelSignal) -> UnifiedResponse {
        let start = Instant::now();
        let mut trace = Trace::new();

        if let Err(e) = request.check() {
            warn!(error = %e, "Rejected query");
            trace.failed("validation", e.to_string());
            let mode = validate_and_normalize_mode(request.mode.as_deref());
            return self
                .composer
                .reject(mode, self.engine.environment(), e.to_string(), trace);
        }

        let decision = self.routing.route_request(&request);
        trace.completed("routing", decision.reason.clone());

        let cache_key = self.cache_key(&decision, &request);
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            match cache::get_json::<UnifiedResponse>(cache.as_ref(), key).await {
                Ok(Some(mut hit)) => {
                    metrics::record_cache(true, RESPONSE_CACHE);
                    trace.completed("cache", "hit");
                    self.engine.record_cache_hit();
                    hit.metadata.cached = true;
                    hit.processing_time = start.elapsed().as_millis() as u64;
                    hit.timestamp = Utc::now();
                    hit.trace = trace.into_steps();
                    self.finish(&hit);
                    return hit;
                }
                Ok(None) => {
                    metrics::record_cache(false, RESPONSE_CACHE);
                    trace.completed("cache", "miss");
                }
                Err(e) => {
                    warn!(error = %e, "Response cache lookup failed");
                    trace.failed("cache", e.to_string());
                }
            }
        }

        let response = match decision.target_mode {
            CanonicalMode::CloudOnly => self.run_cloud_only(&request, &cancel, &mut trace).await,
            CanonicalMode::Cloud => self.run_cloud(&request, &decision, &cancel, &mut trace).await,
            // AUTO never leaves the router
            CanonicalMode::Local | CanonicalMode::Auto => {
                let retrieval = self.retrieve(&request, &decision, &cancel, &mut trace).await;
                (Some(retrieval), None, false)
            }
        };
        let (retrieval, generation, augmentation_used) = response;

        let response = self.composer.compose(Composition {
            mode: decision.target_mode,
            routing_reason: decision.reason.clone(),
            environment: self.engine.environment().to_string(),
            retrieval,
            generation,
            augmentation_used,
            trace,
            processing_time: start.elapsed().as_millis() as u64,
        });

        if response.success {
            if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
                if let Err(e) = cache::set_json(cache.as_ref(), key, &response).await {
                    warn!(error = %e, "Failed to cache response, continuing without cache");
                }
            }
        }

        self.finish(&response);
        response
    }

    fn finish(&self, response: &UnifiedResponse) {
        metrics::record_query(
            response.processing_time as f64 / 1000.0,
            response.mode.as_str(),
            response.engine.as_str(),
            response.success,
            response.results.len(),
        );
        info!(
            mode = %response.mode,
            engine = response.engine.as_str(),
            success = response.success,
            cached = response.metadata.cached,
            results = response.results.len(),
            processing_ms = response.processing_time,
            "Query completed"
        );
    }

    fn cache_key(&self, decision: &RoutingDecision, request: &QueryRequest) -> Option<String> {
        if self.cache.is_none() || !decision.config.enable_cache || request.options.force_fallback {
            return None;
        }
        Some(keys::response(
            decision.target_mode.as_str(),
            &request.query,
            request.category(),
            request.max_results_or(&self.defaults),
            request.threshold_or(&self.defaults),
        ))
    }

    async fn retrieve(
        &self,
        request: &QueryRequest,
        decision: &RoutingDecision,
        cancel: &CancelSignal,
        trace: &mut Trace,
    ) -> HybridResponse {
        let query = RetrievalQuery {
            query: request.query.trim().to_string(),
            category: request.category().map(str::to_string),
            max_results: request.max_results_or(&self.defaults),
            threshold: request.threshold_or(&self.defaults),
            force_fallback: request.options.force_fallback,
        };
        let retrieval = self
            .engine
            .search(&query, decision.config.stage_timeout(), cancel)
            .await;
        trace.record_retrieval(&retrieval);
        retrieval
    }

    async fn run_cloud(
        &self,
        request: &QueryRequest,
        decision: &RoutingDecision,
        cancel: &CancelSignal,
        trace: &mut Trace,
    ) -> (Option<HybridResponse>, Option<Result<GenerationOutput, String>>, bool) {
        let retrieval = self.retrieve(request, decision, cancel, trace).await;
        let augmentation = self.maybe_augment(request, cancel, trace).await;
        let generation = self
            .generate(request, &retrieval.results, augmentation.as_ref(), cancel, trace)
            .await;
        (Some(retrieval), Some(generation), augmentation.is_some())
    }

    async fn run_cloud_only(
        &self,
        request: &QueryRequest,
        cancel: &CancelSignal,
        trace: &mut Trace,
    ) -> (Option<HybridResponse>, Option<Result<GenerationOutput, String>>, bool) {
        let augmentation = self.maybe_augment(request, cancel, trace).await;
        let generation = self
            .generate(request, &[], augmentation.as_ref(), cancel, trace)
            .await;
        (None, Some(generation), augmentation.is_some())
    }

    async fn maybe_augment(
        &self,
        request: &QueryRequest,
        cancel: &CancelSignal,
        trace: &mut Trace,
    ) -> Option<Augmentation> {
        if !request.options.include_context_augmentation {
            return None;
        }
        match self.augmenter.augment(&request.query, cancel).await {
            Ok(aug) => {
                trace.completed("augmentation", format!("{} snippets", aug.snippets.len()));
                Some(aug)
            }
            Err(e) => {
                warn!(error = %e, "Context augmentation failed, continuing without it");
                trace.failed("augmentation", e.to_string());
                None
            }
        }
    }

    async fn generate(
        &self,
        request: &QueryRequest,
        items: &[RetrievalItem],
        augmentation: Option<&Augmentation>,
        cancel: &CancelSignal,
        trace: &mut Trace,
    ) -> Result<GenerationOutput, String> {
        let Some(backend) = &self.generation else {
            let message = "generation backend not configured".to_string();
            trace.failed("generation", message.clone());
            return Err(message);
        };

        let gen_request = build_request(request.query.trim(), items, augmentation, request.servers());
        match run_stage("generation", self.generation_timeout, cancel, backend.generate(&gen_request)).await {
            Ok(out) => {
                trace.completed("generation", format!("{} tokens from {}", out.tokens_used, out.model));
                Ok(out)
            }
            Err(e) => {
                warn!(error = %e, "Generation failed");
                trace.failed("generation", e.to_string());
                Err(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::StepStatus;
    use crate::retrieval::{EngineKind, FallbackEngine};
    use crate::testing::{Behavior, FakeContextService, FakeFallback, FakeGeneration, FakeStore, MemoryCache};
    use waypoint_common::config::ContextServiceConfig;
    use waypoint_common::embeddings::HashEmbedder;

    struct Harness {
        store: Arc<FakeStore>,
        fallback: Option<Arc<FakeFallback>>,
        context: Option<Arc<FakeContextService>>,
        generation: Option<Arc<FakeGeneration>>,
        cache: Option<Arc<MemoryCache>>,
    }

    impl Harness {
        fn new(store: FakeStore) -> Self {
            Self {
                store: Arc::new(store),
                fallback: None,
                context: None,
                generation: None,
                cache: None,
            }
        }

        fn build(&self) -> QueryPipeline {
            let fallback = self
                .fallback
                .clone()
                .map(|f| f as Arc<dyn FallbackEngine>);
            let engine = HybridRetrievalEngine::new(
                self.store.clone(),
                Arc::new(HashEmbedder::new(32)),
                fallback,
                "local",
            );
            let augmenter = ContextAugmenter::new(
                self.context
                    .clone()
                    .map(|c| c as Arc<dyn crate::augment::ContextService>),
                &ContextServiceConfig::default(),
            );
            QueryPipeline::new(
                Arc::new(RoutingSystem::new()),
                Arc::new(engine),
                Arc::new(augmenter),
                self.generation.clone().map(|g| g as Arc<dyn GenerationBackend>),
                self.cache.clone().map(|c| c as Arc<dyn ResponseCache>),
                RetrievalConfig::default(),
                &GenerationConfig::default(),
            )
        }
    }

    fn stages(resp: &UnifiedResponse) -> Vec<(&str, StepStatus)> {
        resp.trace.iter().map(|s| (s.stage.as_str(), s.status)).collect()
    }

    #[tokio::test]
    async fn test_local_mode_is_retrieval_only() {
        let mut h = Harness::new(FakeStore::new(Behavior::Rows(2), Behavior::Rows(0)));
        h.generation = Some(Arc::new(FakeGeneration::ok()));
        let pipeline = h.build();

        let resp = pipeline.execute(QueryRequest::new("check disk usage").with_mode("local")).await;

        assert!(resp.success);
        assert_eq!(resp.mode, CanonicalMode::Local);
        assert_eq!(resp.engine, EngineKind::PrimaryStore);
        assert_eq!(resp.confidence, 0.9);
        assert!(!resp.answer.is_empty());
        assert!(h.generation.as_ref().unwrap().last_prompt().is_none());
        assert_eq!(
            stages(&resp),
            vec![("routing", StepStatus::Completed), ("vector-search", StepStatus::Completed)]
        );
    }

    #[tokio::test]
    async fn test_auto_korean_question_runs_locally() {
        let h = Harness::new(FakeStore::new(Behavior::Rows(1), Behavior::Rows(0)));
        let resp = h
            .build()
            .execute(QueryRequest::new("서버 상태 확인 명령어는?").with_mode("auto"))
            .await;
        assert_eq!(resp.mode, CanonicalMode::Local);
        assert!(resp.success);
    }

    #[tokio::test]
    async fn test_auto_realtime_question_runs_in_cloud() {
        let mut h = Harness::new(FakeStore::new(Behavior::Rows(1), Behavior::Rows(0)));
        h.generation = Some(Arc::new(FakeGeneration::ok()));
        let resp = h
            .build()
            .execute(QueryRequest::new("what is the current CPU load right now").with_mode("auto"))
            .await;
        assert_eq!(resp.mode, CanonicalMode::Cloud);
        assert_eq!(resp.answer, "generated answer");
        assert_eq!(resp.confidence, 0.75);
    }

    #[tokio::test]
    async fn test_primary_failure_served_by_fallback() {
        let mut h = Harness::new(FakeStore::new(Behavior::Fail, Behavior::Fail));
        h.fallback = Some(Arc::new(FakeFallback::new(Behavior::Rows(2))));
        let resp = h.build().execute(QueryRequest::new("restart nginx").with_mode("local")).await;

        assert!(resp.success);
        assert_eq!(resp.engine, EngineKind::Fallback);
        assert!(resp.fallback_used);
        assert_eq!(resp.results.len(), 2);
        assert!(resp.metadata.fallback_reason.is_some());
        assert_eq!(resp.confidence, 0.6);
        assert_eq!(
            stages(&resp),
            vec![
                ("routing", StepStatus::Completed),
                ("vector-search", StepStatus::Failed),
                ("text-search", StepStatus::Failed),
                ("fallback-search", StepStatus::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_augmentation_does_not_abort() {
        let mut h = Harness::new(FakeStore::new(Behavior::Rows(2), Behavior::Rows(0)));
        h.context = Some(Arc::new(FakeContextService::rejecting()));
        h.generation = Some(Arc::new(FakeGeneration::ok()));

        let mut req = QueryRequest::new("why does disk fill up").with_mode("cloud");
        req.options.include_context_augmentation = true;
        let resp = h.build().execute(req).await;

        assert!(resp.success);
        assert!(!resp.metadata.augmentation_used);
        let failed_aug: Vec<_> = resp
            .trace
            .iter()
            .filter(|s| s.stage == "augmentation" && s.status == StepStatus::Failed)
            .collect();
        assert_eq!(failed_aug.len(), 1);
        assert!(resp.trace.iter().any(|s| s.stage == "generation" && s.status == StepStatus::Completed));
    }

    #[tokio::test]
    async fn test_augmentation_feeds_generation() {
        let mut h = Harness::new(FakeStore::new(Behavior::Rows(1), Behavior::Rows(0)));
        h.context = Some(Arc::new(FakeContextService::new(2)));
        let generation = Arc::new(FakeGeneration::ok());
        h.generation = Some(generation.clone());

        let mut req = QueryRequest::new("disk almost full on web-01").with_mode("cloud");
        req.options.include_context_augmentation = true;
        req.context = Some(crate::request::QueryContext {
            servers: vec![crate::request::ServerHint {
                id: "web-01".into(),
                cpu: Some(40.0),
                ..Default::default()
            }],
        });
        let resp = h.build().execute(req).await;

        assert!(resp.metadata.augmentation_used);
        assert_eq!(resp.metadata.model.as_deref(), Some("fake-model"));
        let prompt = generation.last_prompt().unwrap();
        assert!(prompt.contains("Reference material"));
        assert!(prompt.contains("- web-01 cpu=40.0%"));
    }

    #[tokio::test]
    async fn test_cloud_only_skips_retrieval() {
        let store = FakeStore::new(Behavior::Rows(3), Behavior::Rows(3));
        let mut h = Harness::new(store);
        h.generation = Some(Arc::new(FakeGeneration::ok()));

        let resp = h.build().execute(QueryRequest::new("summarize the week").with_mode("cloud-only")).await;

        assert!(resp.success);
        assert_eq!(resp.mode, CanonicalMode::CloudOnly);
        assert_eq!(resp.engine, EngineKind::None);
        assert!(resp.results.is_empty());
        assert_eq!(h.store.vector_calls(), 0);
        assert_eq!(h.store.text_calls(), 0);
    }

    #[tokio::test]
    async fn test_generation_failure_degrades_with_results() {
        let mut h = Harness::new(FakeStore::new(Behavior::Rows(2), Behavior::Rows(0)));
        h.generation = Some(Arc::new(FakeGeneration::failing()));

        let resp = h.build().execute(QueryRequest::new("restart nginx").with_mode("cloud")).await;

        assert!(resp.success);
        assert_eq!(resp.engine, EngineKind::PrimaryStore);
        assert!(resp.metadata.generation_error.is_some());
        assert!(resp.trace.iter().any(|s| s.stage == "generation" && s.status == StepStatus::Failed));
    }

    #[tokio::test]
    async fn test_cloud_only_without_backend_fails_structurally() {
        let h = Harness::new(FakeStore::new(Behavior::Rows(2), Behavior::Rows(0)));
        let resp = h.build().execute(QueryRequest::new("anything").with_mode("CLOUD_ONLY")).await;

        assert!(!resp.success);
        assert_eq!(resp.engine, EngineKind::None);
        assert_eq!(resp.error.as_deref(), Some("generation backend not configured"));
    }

    #[tokio::test]
    async fn test_empty_query_is_structured_failure() {
        let h = Harness::new(FakeStore::new(Behavior::Rows(2), Behavior::Rows(0)));
        let pipeline = h.build();
        let resp = pipeline.execute(QueryRequest::new("  ")).await;

        assert!(!resp.success);
        assert!(resp.error.is_some());
        assert_eq!(resp.engine, EngineKind::None);
        assert_eq!(h.store.vector_calls(), 0);
        assert_eq!(pipeline.routing().stats().total, 0);
    }

    #[tokio::test]
    async fn test_unknown_mode_runs_locally() {
        let h = Harness::new(FakeStore::new(Behavior::Rows(1), Behavior::Rows(0)));
        let resp = h.build().execute(QueryRequest::new("disk").with_mode("turbo")).await;
        assert_eq!(resp.mode, CanonicalMode::Local);
        assert!(resp.success);
    }

    #[tokio::test]
    async fn test_response_cache_round_trip() {
        let mut h = Harness::new(FakeStore::new(Behavior::Rows(2), Behavior::Rows(0)));
        h.cache = Some(Arc::new(MemoryCache::default()));
        let pipeline = h.build();

        let first = pipeline.execute(QueryRequest::new("disk usage").with_mode("local")).await;
        assert!(!first.metadata.cached);

        let second = pipeline.execute(QueryRequest::new("disk usage").with_mode("local")).await;
        assert!(second.metadata.cached);
        let ids = |r: &UnifiedResponse| r.results.iter().map(|i| i.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&second), ids(&first));
        assert_eq!(h.store.vector_calls(), 1);
        assert_eq!(second.trace.last().map(|s| s.stage.as_str()), Some("cache"));
        assert!(second.timestamp >= first.timestamp);

        let stats = pipeline.engine().stats();
        assert_eq!(stats.total_queries, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_cache_hit_gets_fresh_timestamp() {
        let mut h = Harness::new(FakeStore::new(Behavior::Rows(2), Behavior::Rows(0)));
        let cache = Arc::new(MemoryCache::default());
        h.cache = Some(cache.clone());
        let pipeline = h.build();

        let first = pipeline.execute(QueryRequest::new("disk usage").with_mode("local")).await;

        // Age the stored entry so a reused timestamp is detectable
        let stale = first.timestamp - chrono::Duration::hours(1);
        for payload in cache.entries.lock().unwrap().values_mut() {
            let mut stored: serde_json::Value = serde_json::from_str(payload).unwrap();
            stored["timestamp"] = serde_json::json!(stale);
            *payload = stored.to_string();
        }

        let second = pipeline.execute(QueryRequest::new("disk usage").with_mode("local")).await;
        assert!(second.metadata.cached);
        assert!(second.timestamp > stale);
    }

    #[tokio::test]
    async fn test_force_fallback_bypasses_cache() {
        let mut h = Harness::new(FakeStore::new(Behavior::Rows(2), Behavior::Rows(0)));
        h.cache = Some(Arc::new(MemoryCache::default()));
        h.fallback = Some(Arc::new(FakeFallback::new(Behavior::Rows(1))));
        let pipeline = h.build();

        let mut req = QueryRequest::new("disk usage").with_mode("local");
        req.options.force_fallback = true;
        let resp = pipeline.execute(req).await;

        assert_eq!(resp.engine, EngineKind::Fallback);
        assert!(h.cache.as_ref().unwrap().entries.lock().unwrap().is_empty());
        assert!(!resp.trace.iter().any(|s| s.stage == "cache"));
    }

    #[tokio::test]
    async fn test_cache_follows_mode_table() {
        let mut h = Harness::new(FakeStore::new(Behavior::Rows(2), Behavior::Rows(0)));
        h.cache = Some(Arc::new(MemoryCache::default()));
        let pipeline = h.build();

        // AUTO resolves to LOCAL, whose table entry enables the cache
        pipeline.execute(QueryRequest::new("hello").with_mode("auto")).await;
        assert_eq!(h.cache.as_ref().unwrap().entries.lock().unwrap().len(), 1);

        // CLOUD_ONLY disables it
        let mut h = Harness::new(FakeStore::new(Behavior::Rows(2), Behavior::Rows(0)));
        h.cache = Some(Arc::new(MemoryCache::default()));
        h.generation = Some(Arc::new(FakeGeneration::ok()));
        h.build().execute(QueryRequest::new("hello").with_mode("cloud_only")).await;
        assert!(h.cache.as_ref().unwrap().entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_errors_are_ignored() {
        let mut h = Harness::new(FakeStore::new(Behavior::Rows(2), Behavior::Rows(0)));
        h.cache = Some(Arc::new(MemoryCache {
            fail: true,
            ..Default::default()
        }));
        let resp = h.build().execute(QueryRequest::new("disk").with_mode("local")).await;

        assert!(resp.success);
        assert!(resp.trace.iter().any(|s| s.stage == "cache" && s.status == StepStatus::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_time_under_paused_clock() {
        let store = FakeStore::new(Behavior::Rows(1), Behavior::Rows(0)).with_delay(Duration::from_millis(400));
        let h = Harness::new(store);
        let resp = h.build().execute(QueryRequest::new("disk").with_mode("local")).await;

        assert!(resp.success);
        assert!(resp.processing_time >= 400);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_budget_timeout_falls_back() {
        let mut h = Harness::new(FakeStore::new(Behavior::Hang, Behavior::Hang));
        h.fallback = Some(Arc::new(FakeFallback::new(Behavior::Rows(1))));
        let resp = h.build().execute(QueryRequest::new("disk").with_mode("local")).await;

        assert!(resp.success);
        assert_eq!(resp.engine, EngineKind::Fallback);
        // LOCAL budget is 3000ms per stage, two primary stages timed out
        assert!(resp.processing_time >= 6000);
    }

    #[tokio::test]
    async fn test_confidence_in_unit_range() {
        for (vector, text, mode) in [
            (Behavior::Rows(1), Behavior::Rows(0), "local"),
            (Behavior::Rows(0), Behavior::Rows(1), "local"),
            (Behavior::Fail, Behavior::Fail, "local"),
            (Behavior::Rows(1), Behavior::Rows(0), "cloud"),
        ] {
            let mut h = Harness::new(FakeStore::new(vector, text));
            h.fallback = Some(Arc::new(FakeFallback::new(Behavior::Rows(1))));
            h.generation = Some(Arc::new(FakeGeneration {
                confidence: Some(7.0),
                ..FakeGeneration::ok()
            }));
            let resp = h.build().execute(QueryRequest::new("disk").with_mode(mode)).await;
            assert!(resp.success);
            assert!((0.0..=1.0).contains(&resp.confidence));
        }
    }
}
