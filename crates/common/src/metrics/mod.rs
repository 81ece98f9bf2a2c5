//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// Metrics prefix for all Waypoint metrics
pub const METRICS_PREFIX: &str = "waypoint";

/// SLO-aligned histogram buckets for query latency (in seconds)
/// Targets: LOCAL P99 < 3s, CLOUD P99 < 8s
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    3.000,  // 3s - LOCAL budget
    5.000,  // 5s
    8.000,  // 8s - CLOUD budget
    15.00,  // 15s
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of pipeline queries by mode, engine and outcome"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end query latency in seconds"
    );

    describe_counter!(
        format!("{}_routing_decisions_total", METRICS_PREFIX),
        Unit::Count,
        "Routing decisions by resolved mode"
    );

    describe_histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Latency of individual pipeline stages"
    );

    describe_counter!(
        format!("{}_stage_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Failed pipeline stages by stage and reason"
    );

    describe_counter!(
        format!("{}_fallback_invocations_total", METRICS_PREFIX),
        Unit::Count,
        "Times the in-process fallback index was queried"
    );

    describe_counter!(
        format!("{}_augmentation_total", METRICS_PREFIX),
        Unit::Count,
        "Context augmentation attempts by outcome"
    );

    describe_gauge!(
        format!("{}_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of results returned by the last query"
    );

    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total response cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total response cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Record a completed pipeline query
pub fn record_query(duration_secs: f64, mode: &str, engine: &str, success: bool, result_count: usize) {
    let status = if success { "success" } else { "failure" };

    counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        "mode" => mode.to_string(),
        "engine" => engine.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        "mode" => mode.to_string()
    )
    .record(duration_secs);

    gauge!(
        format!("{}_results_count", METRICS_PREFIX),
        "mode" => mode.to_string()
    )
    .set(result_count as f64);
}

/// Record a routing decision
pub fn record_routing(mode: &str) {
    counter!(
        format!("{}_routing_decisions_total", METRICS_PREFIX),
        "mode" => mode.to_string()
    )
    .increment(1);
}

/// Record one stage execution
pub fn record_stage(stage: &str, duration_secs: f64, failure: Option<&str>) {
    histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .record(duration_secs);

    if let Some(reason) = failure {
        counter!(
            format!("{}_stage_failures_total", METRICS_PREFIX),
            "stage" => stage.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }
}

/// Record a fallback index invocation
pub fn record_fallback(success: bool) {
    counter!(
        format!("{}_fallback_invocations_total", METRICS_PREFIX),
        "status" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Record a context augmentation attempt
pub fn record_augmentation(used: bool) {
    counter!(
        format!("{}_augmentation_total", METRICS_PREFIX),
        "status" => if used { "used" } else { "failed" }
    )
    .increment(1);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets() {
        // Verify buckets are sorted and contain the per-mode budgets
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }

        assert!(LATENCY_BUCKETS.contains(&3.000));
        assert!(LATENCY_BUCKETS.contains(&8.000));
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every helper must be a no-op
        record_query(0.12, "LOCAL", "primary-store", true, 3);
        record_stage("vector-search", 0.02, Some("timeout"));
        record_fallback(false);
        record_augmentation(true);
        record_cache(true, "responses");
    }
}
