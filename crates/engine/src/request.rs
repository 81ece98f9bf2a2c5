//! Inbound query shape

use serde::{Deserialize, Serialize};
use validator::Validate;
use waypoint_common::config::RetrievalConfig;
use waypoint_common::errors::{AppError, Result};

/// Upper bound on `maxResults`
pub const MAX_RESULTS_LIMIT: usize = 50;

/// Upper bound on query length in characters
pub const MAX_QUERY_CHARS: u64 = 2000;

/// A natural-language request to the pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Query text
    #[validate(length(min = 1, max = 2000))]
    pub query: String,

    /// Requested mode; normalized by the routing system
    #[serde(default)]
    pub mode: Option<String>,

    /// Category filter for text and fallback search
    #[serde(default)]
    pub category: Option<String>,

    /// Maximum results (clamped to 1..=50)
    #[serde(default)]
    pub max_results: Option<usize>,

    /// Similarity threshold
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0))]
    pub threshold: Option<f32>,

    #[serde(default)]
    pub options: QueryOptions,

    #[serde(default)]
    pub context: Option<QueryContext>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    /// Go straight to the fallback engine when one is constructed
    #[serde(default)]
    pub force_fallback: bool,

    /// Fetch auxiliary snippets before generation
    #[serde(default)]
    pub include_context_augmentation: bool,
}

/// Structured hints used for prompt enrichment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryContext {
    #[serde(default)]
    pub servers: Vec<ServerHint>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHint {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<f32>,
}

impl QueryRequest {
    /// Convenience constructor used by callers that only have text
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    /// Field-level validation plus the whitespace-only check
    pub fn check(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(AppError::Validation {
                message: "query must not be empty".to_string(),
                field: Some("query".to_string()),
            });
        }

        self.validate().map_err(|errors| {
            let field = errors.field_errors().keys().next().map(|k| k.to_string());
            AppError::Validation {
                message: match field.as_deref() {
                    Some("query") => format!("query must be at most {} characters", MAX_QUERY_CHARS),
                    Some("threshold") => "threshold must be between 0 and 1".to_string(),
                    _ => errors.to_string(),
                },
                field,
            }
        })
    }

    /// Effective result limit
    pub fn max_results_or(&self, defaults: &RetrievalConfig) -> usize {
        self.max_results
            .unwrap_or(defaults.default_max_results)
            .clamp(1, MAX_RESULTS_LIMIT)
    }

    /// Effective similarity threshold
    pub fn threshold_or(&self, defaults: &RetrievalConfig) -> f32 {
        let t = self.threshold.unwrap_or(defaults.default_threshold);
        if t.is_nan() {
            defaults.default_threshold
        } else {
            t.clamp(0.0, 1.0)
        }
    }

    pub fn servers(&self) -> &[ServerHint] {
        self.context.as_ref().map(|c| c.servers.as_slice()).unwrap_or(&[])
    }

    /// Category with blank values treated as absent
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserializes_camel_case() {
        let req: QueryRequest = serde_json::from_str(
            r#"{
                "query": "disk usage",
                "mode": "auto",
                "maxResults": 7,
                "options": {"forceFallback": true, "includeContextAugmentation": true},
                "context": {"servers": [{"id": "web-01", "cpu": 91.5}]}
            }"#,
        )
        .unwrap();

        assert_eq!(req.max_results, Some(7));
        assert!(req.options.force_fallback);
        assert!(req.options.include_context_augmentation);
        assert_eq!(req.servers().len(), 1);
        assert_eq!(req.servers()[0].cpu, Some(91.5));
    }

    #[test]
    fn test_blank_query_rejected() {
        let err = QueryRequest::new("   ").check().unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "query"));
    }

    #[test]
    fn test_overlong_query_rejected() {
        let err = QueryRequest::new("a".repeat(2001)).check().unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert!(QueryRequest::new("a".repeat(2000)).check().is_ok());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut req = QueryRequest::new("disk");
        req.threshold = Some(1.5);
        let err = req.check().unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "threshold"));
    }

    #[test]
    fn test_limits_are_clamped() {
        let defaults = RetrievalConfig::default();
        let mut req = QueryRequest::new("disk");
        assert_eq!(req.max_results_or(&defaults), 5);
        assert_eq!(req.threshold_or(&defaults), 0.5);

        req.max_results = Some(0);
        assert_eq!(req.max_results_or(&defaults), 1);
        req.max_results = Some(500);
        assert_eq!(req.max_results_or(&defaults), MAX_RESULTS_LIMIT);
    }

    #[test]
    fn test_blank_category_is_absent() {
        let mut req = QueryRequest::new("disk");
        req.category = Some("  ".into());
        assert_eq!(req.category(), None);
        req.category = Some(" system ".into());
        assert_eq!(req.category(), Some("system"));
    }
}
