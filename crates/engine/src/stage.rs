//! Stage execution helpers: timeout and cooperative cancellation

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use waypoint_common::errors::{AppError, Result};
use waypoint_common::metrics;

/// Sender side of a cancellation signal
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // Receivers may all be gone already
        let _ = self.tx.send(true);
    }
}

/// Receiver side, cloned into every stage
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A linked handle/signal pair
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelSignal { rx })
    }

    /// A signal that never fires
    pub fn never() -> Self {
        let (_, signal) = Self::pair();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Run one pipeline stage against its time budget and the cancel signal.
///
/// Timeout maps to [`AppError::StageTimeout`], cancellation to
/// [`AppError::Cancelled`]. Duration and failures are recorded as metrics.
pub async fn run_stage<T, F>(stage: &str, budget: Duration, cancel: &CancelSignal, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let start = Instant::now();

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled { stage: stage.to_string() }),
        res = tokio::time::timeout(budget, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(AppError::StageTimeout {
                stage: stage.to_string(),
                timeout_ms: budget.as_millis() as u64,
            }),
        },
    };

    metrics::record_stage(
        stage,
        start.elapsed().as_secs_f64(),
        outcome.as_ref().err().map(failure_reason),
    );

    outcome
}

/// Short label for a stage failure
pub fn failure_reason(err: &AppError) -> &'static str {
    match err {
        AppError::StageTimeout { .. } => "timeout",
        AppError::Cancelled { .. } => "cancelled",
        AppError::EmptyResult { .. } => "empty",
        AppError::Connectivity { .. } => "connectivity",
        AppError::EmbeddingError { .. } => "embedding",
        _ => "error",
    }
}
