//! Query handler

use crate::AppState;
use axum::{extract::State, Json};
use tokio::time::sleep;
use tracing::{instrument, warn};
use waypoint_common::errors::Result;
use waypoint_engine::{CancelSignal, QueryRequest, UnifiedResponse};

/// Run one query through the pipeline.
///
/// Malformed requests are rejected with a 400 before any stage runs. Past
/// that point the body is always a [`UnifiedResponse`]; once the request
/// deadline passes the in-flight stage is cancelled and the response
/// reports it.
#[instrument(skip_all)]
pub async fn query(State(state): State<AppState>, Json(request): Json<QueryRequest>) -> Result<Json<UnifiedResponse>> {
    request.check()?;

    let (handle, signal) = CancelSignal::pair();
    let deadline = state.config.request_timeout();
    let run = state.pipeline.execute_with_cancel(request, signal);
    tokio::pin!(run);

    let response = tokio::select! {
        response = &mut run => response,
        _ = sleep(deadline) => {
            warn!(deadline_ms = deadline.as_millis() as u64, "Request deadline passed, cancelling");
            handle.cancel();
            run.await
        }
    };

    Ok(Json(response))
}
