//! Hybrid retrieval
//!
//! Primary store (vector, then text search) with an optional in-process
//! fallback index:
//! - [`HybridRetrievalEngine`] runs the chain
//! - [`FallbackIndex`] is the secondary engine
//! - [`RetrievalStats`] counts outcomes

mod fallback;
mod hybrid;
mod stats;

pub use fallback::{FallbackDocument, FallbackEngine, FallbackIndex};
pub use hybrid::{EngineHealth, HybridRetrievalEngine};
pub use stats::{RetrievalStats, RetrievalStatsSnapshot};

use serde::{Deserialize, Serialize};

/// Confidence of an answer served by vector search
pub const VECTOR_CONFIDENCE: f32 = 0.9;
/// Confidence of an answer served by primary text search
pub const TEXT_CONFIDENCE: f32 = 0.7;
/// Confidence of an answer served by the fallback index
pub const FALLBACK_CONFIDENCE: f32 = 0.6;

/// One retrieved document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalItem {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category: String,
    /// Relevance in [0, 1]
    pub score: f32,
}

/// Which engine produced the results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    PrimaryStore,
    Fallback,
    None,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::PrimaryStore => "primary-store",
            EngineKind::Fallback => "fallback",
            EngineKind::None => "none",
        }
    }
}

/// Retrieval parameters after request defaults are applied
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub query: String,
    pub category: Option<String>,
    pub max_results: usize,
    pub threshold: f32,
    pub force_fallback: bool,
}

/// Retrieval stages in chain order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalStage {
    VectorSearch,
    TextSearch,
    FallbackSearch,
}

impl RetrievalStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStage::VectorSearch => "vector-search",
            RetrievalStage::TextSearch => "text-search",
            RetrievalStage::FallbackSearch => "fallback-search",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Succeeded,
    Empty,
    Failed,
}

/// Record of one stage the engine ran
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalAttempt {
    pub stage: RetrievalStage,
    pub outcome: AttemptOutcome,
    pub rows: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridMetadata {
    pub total_results: usize,
    pub primary_engine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub environment: String,
}

/// Outcome of one hybrid search
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridResponse {
    pub success: bool,
    pub results: Vec<RetrievalItem>,
    pub engine: EngineKind,
    /// Milliseconds
    pub processing_time: u64,
    pub confidence: f32,
    pub fallback_used: bool,
    pub metadata: HybridMetadata,
    /// Stages in the order they ran
    #[serde(default, skip_serializing)]
    pub attempts: Vec<RetrievalAttempt>,
}

/// Clamp scores, order by descending score and truncate
pub(crate) fn finalize_items(mut items: Vec<RetrievalItem>, max_results: usize) -> Vec<RetrievalItem> {
    for item in &mut items {
        item.score = if item.score.is_nan() {
            0.0
        } else {
            item.score.clamp(0.0, 1.0)
        };
    }
    items.sort_by(|a, b| b.score.total_cmp(&a.score));
    items.truncate(max_results);
    items
}
