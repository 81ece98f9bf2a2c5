//! Health check handlers

use crate::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::time::Instant;
use waypoint_engine::{EngineHealth, ResolvedProfile};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub profile: ResolvedProfile,
    pub engine: EngineHealth,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub cache: CheckResult,
    pub generation: CheckResult,
    pub augmentation: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    fn up(latency_ms: Option<u64>) -> Self {
        Self {
            status: "up".to_string(),
            latency_ms,
            error: None,
        }
    }

    fn down(error: String) -> Self {
        Self {
            status: "down".to_string(),
            latency_ms: None,
            error: Some(error),
        }
    }

    fn disabled() -> Self {
        Self {
            status: "disabled".to_string(),
            latency_ms: None,
            error: None,
        }
    }
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: waypoint_common::VERSION,
    })
}

/// Readiness probe - ready while either retrieval engine can answer
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let engine = state.pipeline.engine().health_check().await;

    let cache = match state.deps.cache().await {
        Ok(Some(cache)) => {
            let start = Instant::now();
            match cache.ping().await {
                Ok(()) => CheckResult::up(Some(start.elapsed().as_millis() as u64)),
                Err(e) => CheckResult::down(e.to_string()),
            }
        }
        Ok(None) => CheckResult::disabled(),
        Err(e) => CheckResult::down(e.to_string()),
    };

    let generation = match state.deps.generation().await {
        Ok(Some(_)) => CheckResult::up(None),
        Ok(None) => CheckResult::disabled(),
        Err(e) => CheckResult::down(e.to_string()),
    };

    let augmentation = match state.deps.context_service().await {
        Ok(Some(_)) => CheckResult::up(None),
        Ok(None) => CheckResult::disabled(),
        Err(e) => CheckResult::down(e.to_string()),
    };

    let status = if engine.overall {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            status: if engine.overall { "ready" } else { "not_ready" }.to_string(),
            profile: state.deps.profile(),
            engine,
            checks: HealthChecks {
                cache,
                generation,
                augmentation,
            },
        }),
    )
}
