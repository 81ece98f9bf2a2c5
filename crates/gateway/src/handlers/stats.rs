//! Statistics and metrics handlers

use crate::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tracing::info;
use waypoint_engine::retrieval::RetrievalStatsSnapshot;
use waypoint_engine::{ResolvedProfile, RoutingStats};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub routing: RoutingStats,
    pub retrieval: RetrievalStatsSnapshot,
    pub profile: ResolvedProfile,
    pub fallback_available: bool,
}

fn snapshot(state: &AppState) -> StatsResponse {
    let engine = state.pipeline.engine();
    StatsResponse {
        routing: state.pipeline.routing().stats(),
        retrieval: engine.stats(),
        profile: state.deps.profile(),
        fallback_available: engine.has_fallback(),
    }
}

/// Routing and retrieval counters
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(snapshot(&state))
}

/// Zero every counter and return the fresh snapshot
pub async fn reset(State(state): State<AppState>) -> Json<StatsResponse> {
    state.pipeline.routing().reset_stats();
    state.pipeline.engine().reset_stats();
    info!("Statistics reset");
    Json(snapshot(&state))
}

/// Prometheus scrape endpoint
pub async fn prometheus(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_engine::retrieval::RetrievalStats;
    use waypoint_engine::RuntimeProfile;

    #[test]
    fn test_stats_shape() {
        let body = StatsResponse {
            routing: RoutingStats::default(),
            retrieval: RetrievalStats::default().snapshot(),
            profile: ResolvedProfile {
                profile: RuntimeProfile::Local,
                fallback_enabled: true,
            },
            fallback_available: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["routing"]["cloudOnly"], 0);
        assert_eq!(json["retrieval"]["totalQueries"], 0);
        assert_eq!(json["profile"]["profile"], "local");
        assert_eq!(json["fallbackAvailable"], true);
    }
}
