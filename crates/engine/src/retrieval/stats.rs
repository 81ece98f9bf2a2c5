use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide retrieval counters.
///
/// `total_queries` counts passes through the retrieval chain. Requests served
/// from the response cache never reach the chain and are counted in
/// `cache_hits` instead.
#[derive(Debug, Default)]
pub struct RetrievalStats {
    total_queries: AtomicU64,
    primary_successes: AtomicU64,
    fallback_invocations: AtomicU64,
    fallback_successes: AtomicU64,
    total_failures: AtomicU64,
    cache_hits: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalStatsSnapshot {
    pub total_queries: u64,
    pub primary_successes: u64,
    pub fallback_invocations: u64,
    pub fallback_successes: u64,
    pub total_failures: u64,
    pub cache_hits: u64,
    pub success_rate: f64,
    pub fallback_rate: f64,
}

impl RetrievalStats {
    pub fn record_query(&self) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_primary_success(&self) {
        self.primary_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_invocation(&self) {
        self.fallback_invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_success(&self) {
        self.fallback_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RetrievalStatsSnapshot {
        let total = self.total_queries.load(Ordering::Relaxed);
        let primary = self.primary_successes.load(Ordering::Relaxed);
        let invocations = self.fallback_invocations.load(Ordering::Relaxed);

        let ratio = |n: u64| if total == 0 { 0.0 } else { n as f64 / total as f64 };

        RetrievalStatsSnapshot {
            total_queries: total,
            primary_successes: primary,
            fallback_invocations: invocations,
            fallback_successes: self.fallback_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            success_rate: ratio(primary + invocations),
            fallback_rate: ratio(invocations),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.total_queries,
            &self.primary_successes,
            &self.fallback_invocations,
            &self.fallback_successes,
            &self.total_failures,
            &self.cache_hits,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_zero_without_queries() {
        let stats = RetrievalStats::default();
        let snap = stats.snapshot();
        assert_eq!(snap.success_rate, 0.0);
        assert_eq!(snap.fallback_rate, 0.0);
    }

    #[test]
    fn test_derived_rates() {
        let stats = RetrievalStats::default();
        for _ in 0..4 {
            stats.record_query();
        }
        stats.record_primary_success();
        stats.record_primary_success();
        stats.record_fallback_invocation();
        stats.record_failure();
        stats.record_cache_hit();

        let snap = stats.snapshot();
        assert_eq!(snap.total_queries, 4);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.success_rate, 0.75);
        assert_eq!(snap.fallback_rate, 0.25);

        stats.reset();
        assert_eq!(stats.snapshot().total_queries, 0);
        assert_eq!(stats.snapshot().cache_hits, 0);
    }
}
