//! Response composition
//!
//! Merges retrieval and generation output into a [`UnifiedResponse`],
//! keeps the execution trace, and settles the final confidence.

use crate::generation::GenerationOutput;
use crate::retrieval::{AttemptOutcome, EngineKind, HybridResponse, RetrievalItem};
use crate::routing::CanonicalMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Results rendered into a retrieval-only answer
const ANSWER_ITEMS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub stage: String,
    pub description: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    pub timestamp: DateTime<Utc>,
}

/// Ordered record of the stages a request went through
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace {
    steps: Vec<TraceStep>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: &str, description: impl Into<String>, status: StepStatus) {
        let progress = match status {
            StepStatus::Completed | StepStatus::Failed => Some(100),
            StepStatus::Pending => None,
        };
        self.steps.push(TraceStep {
            stage: stage.to_string(),
            description: description.into(),
            status,
            progress,
            timestamp: Utc::now(),
        });
    }

    pub fn completed(&mut self, stage: &str, description: impl Into<String>) {
        self.push(stage, description, StepStatus::Completed);
    }

    pub fn failed(&mut self, stage: &str, description: impl Into<String>) {
        self.push(stage, description, StepStatus::Failed);
    }

    /// One step per retrieval stage the engine actually ran
    pub fn record_retrieval(&mut self, retrieval: &HybridResponse) {
        for attempt in &retrieval.attempts {
            let stage = attempt.stage.as_str();
            match attempt.outcome {
                AttemptOutcome::Succeeded => self.completed(stage, format!("{} results", attempt.rows)),
                AttemptOutcome::Empty => self.failed(stage, "no results"),
                AttemptOutcome::Failed => self.failed(
                    stage,
                    attempt.detail.clone().unwrap_or_else(|| "failed".to_string()),
                ),
            }
        }
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<TraceStep> {
        self.steps
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub total_results: usize,
    pub primary_engine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub environment: String,
    pub augmentation_used: bool,
    pub routing_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_error: Option<String>,
}

/// What the caller receives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedResponse {
    pub success: bool,
    pub answer: String,
    pub results: Vec<RetrievalItem>,
    pub engine: EngineKind,
    pub mode: CanonicalMode,
    /// Milliseconds
    pub processing_time: u64,
    pub confidence: f32,
    pub fallback_used: bool,
    pub trace: Vec<TraceStep>,
    pub metadata: ResponseMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Inputs for one composition
pub struct Composition {
    pub mode: CanonicalMode,
    pub routing_reason: String,
    pub environment: String,
    pub retrieval: Option<HybridResponse>,
    /// `Err` carries the generation failure message
    pub generation: Option<Result<GenerationOutput, String>>,
    pub augmentation_used: bool,
    pub trace: Trace,
    pub processing_time: u64,
}

pub struct ResponseComposer {
    default_generation_confidence: f32,
}

impl Default for ResponseComposer {
    fn default() -> Self {
        Self::new(0.75)
    }
}

impl ResponseComposer {
    pub fn new(default_generation_confidence: f32) -> Self {
        Self {
            default_generation_confidence: clamp_unit(default_generation_confidence),
        }
    }

    pub fn compose(&self, c: Composition) -> UnifiedResponse {
        let (results, engine, fallback_used, fallback_reason, retrieval_confidence, retrieval_ok) =
            match c.retrieval {
                Some(r) => {
                    let ok = r.success && !r.results.is_empty();
                    (r.results, r.engine, r.fallback_used, r.metadata.fallback_reason, r.confidence, ok)
                }
                None => (Vec::new(), EngineKind::None, false, None, 0.0, false),
            };

        let mut metadata = ResponseMetadata {
            total_results: results.len(),
            primary_engine: EngineKind::PrimaryStore.as_str().to_string(),
            fallback_reason,
            environment: c.environment,
            augmentation_used: c.augmentation_used,
            routing_reason: c.routing_reason,
            model: None,
            tokens_used: None,
            cached: false,
            generation_error: None,
        };

        let (success, answer, confidence, error) = match c.generation {
            Some(Ok(out)) => {
                let confidence = out
                    .confidence
                    .map(clamp_unit)
                    .unwrap_or(self.default_generation_confidence);
                metadata.model = Some(out.model);
                metadata.tokens_used = Some(out.tokens_used);
                (true, out.text, confidence, None)
            }
            // Retrieval still answers the question
            Some(Err(message)) if retrieval_ok => {
                metadata.generation_error = Some(message);
                (true, render_answer(&results), retrieval_confidence, None)
            }
            Some(Err(message)) => (false, String::new(), 0.0, Some(message)),
            None if retrieval_ok => (true, render_answer(&results), retrieval_confidence, None),
            None => {
                let message = metadata
                    .fallback_reason
                    .clone()
                    .unwrap_or_else(|| "no results".to_string());
                (false, String::new(), 0.0, Some(message))
            }
        };

        UnifiedResponse {
            success,
            answer,
            results,
            engine,
            mode: c.mode,
            processing_time: c.processing_time,
            confidence: clamp_unit(confidence),
            fallback_used,
            trace: c.trace.into_steps(),
            metadata,
            error,
            timestamp: Utc::now(),
        }
    }

    /// Structured failure for requests that never reached a stage
    pub fn reject(&self, mode: CanonicalMode, environment: &str, message: String, trace: Trace) -> UnifiedResponse {
        UnifiedResponse {
            success: false,
            answer: String::new(),
            results: Vec::new(),
            engine: EngineKind::None,
            mode,
            processing_time: 0,
            confidence: 0.0,
            fallback_used: false,
            trace: trace.into_steps(),
            metadata: ResponseMetadata {
                total_results: 0,
                primary_engine: EngineKind::PrimaryStore.as_str().to_string(),
                fallback_reason: None,
                environment: environment.to_string(),
                augmentation_used: false,
                routing_reason: String::new(),
                model: None,
                tokens_used: None,
                cached: false,
                generation_error: None,
            },
            error: Some(message),
            timestamp: Utc::now(),
        }
    }
}

fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Plain-text answer from the top results
pub fn render_answer(results: &[RetrievalItem]) -> String {
    results
        .iter()
        .take(ANSWER_ITEMS)
        .map(|item| match (&item.command, &item.description) {
            (Some(cmd), Some(desc)) => format!("`{}` - {}", cmd, desc),
            (Some(cmd), None) => format!("`{}`", cmd),
            (None, Some(desc)) => desc.clone(),
            (None, None) => item.content.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{HybridMetadata, RetrievalAttempt, RetrievalStage};

    fn item(id: &str, command: Option<&str>) -> RetrievalItem {
        RetrievalItem {
            id: id.into(),
            content: format!("content {}", id),
            command: command.map(str::to_string),
            description: command.map(|_| "what it does".to_string()),
            category: "system".into(),
            score: 0.8,
        }
    }

    fn retrieval(success: bool, results: Vec<RetrievalItem>, engine: EngineKind) -> HybridResponse {
        HybridResponse {
            success,
            engine,
            processing_time: 5,
            confidence: if success { 0.9 } else { 0.0 },
            fallback_used: engine == EngineKind::Fallback,
            metadata: HybridMetadata {
                total_results: results.len(),
                primary_engine: "primary-store".into(),
                fallback_reason: (!success).then(|| "vector-search failed".to_string()),
                environment: "local".into(),
            },
            results,
            attempts: vec![RetrievalAttempt {
                stage: RetrievalStage::VectorSearch,
                outcome: if success {
                    AttemptOutcome::Succeeded
                } else {
                    AttemptOutcome::Failed
                },
                rows: 1,
                detail: None,
            }],
        }
    }

    fn composition(retrieval: Option<HybridResponse>, generation: Option<Result<GenerationOutput, String>>) -> Composition {
        Composition {
            mode: CanonicalMode::Cloud,
            routing_reason: "requested CLOUD".into(),
            environment: "local".into(),
            retrieval,
            generation,
            augmentation_used: false,
            trace: Trace::new(),
            processing_time: 12,
        }
    }

    fn generated(confidence: Option<f32>) -> GenerationOutput {
        GenerationOutput {
            text: "use df -h".into(),
            confidence,
            model: "m".into(),
            tokens_used: 10,
        }
    }

    #[test]
    fn test_retrieval_only_answer() {
        let composer = ResponseComposer::default();
        let resp = composer.compose(composition(
            Some(retrieval(true, vec![item("a", Some("df -h")), item("b", None)], EngineKind::PrimaryStore)),
            None,
        ));
        assert!(resp.success);
        assert_eq!(resp.confidence, 0.9);
        assert_eq!(resp.answer, "`df -h` - what it does\ncontent b");
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_generation_default_and_clamped_confidence() {
        let composer = ResponseComposer::default();
        let resp = composer.compose(composition(None, Some(Ok(generated(None)))));
        assert!(resp.success);
        assert_eq!(resp.confidence, 0.75);
        assert_eq!(resp.engine, EngineKind::None);
        assert_eq!(resp.metadata.tokens_used, Some(10));

        let resp = composer.compose(composition(None, Some(Ok(generated(Some(3.0))))));
        assert_eq!(resp.confidence, 1.0);
    }

    #[test]
    fn test_generation_failure_degrades_to_retrieval() {
        let composer = ResponseComposer::default();
        let resp = composer.compose(composition(
            Some(retrieval(true, vec![item("a", Some("uptime"))], EngineKind::PrimaryStore)),
            Some(Err("upstream 500".into())),
        ));
        assert!(resp.success);
        assert_eq!(resp.metadata.generation_error.as_deref(), Some("upstream 500"));
        assert_eq!(resp.confidence, 0.9);
        assert!(resp.answer.contains("uptime"));
    }

    #[test]
    fn test_generation_failure_without_results_fails() {
        let composer = ResponseComposer::default();
        let resp = composer.compose(composition(None, Some(Err("upstream 500".into()))));
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("upstream 500"));
        assert_eq!(resp.confidence, 0.0);
    }

    #[test]
    fn test_exhausted_retrieval_reports_reason() {
        let composer = ResponseComposer::default();
        let resp = composer.compose(composition(Some(retrieval(false, vec![], EngineKind::None)), None));
        assert!(!resp.success);
        assert_eq!(resp.engine, EngineKind::None);
        assert_eq!(resp.error.as_deref(), Some("vector-search failed"));
    }

    #[test]
    fn test_trace_from_attempts() {
        let mut trace = Trace::new();
        trace.completed("routing", "requested LOCAL");
        trace.record_retrieval(&retrieval(false, vec![], EngineKind::None));
        let steps = trace.steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].stage, "vector-search");
        assert_eq!(steps[1].status, StepStatus::Failed);
        assert_eq!(steps[1].progress, Some(100));
    }

    #[test]
    fn test_serialized_shape() {
        let composer = ResponseComposer::default();
        let resp = composer.compose(composition(None, Some(Ok(generated(None)))));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["mode"], "CLOUD");
        assert_eq!(json["engine"], "none");
        assert_eq!(json["metadata"]["augmentationUsed"], false);
        assert!(json["processingTime"].is_u64());
        assert!(json["timestamp"].is_string());
        assert!(json.get("error").is_none());
    }
}
