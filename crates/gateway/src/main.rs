//! Waypoint API Gateway
//!
//! HTTP surface over the query engine.
//! Handles:
//! - Query execution
//! - Health, readiness and statistics
//! - Rate limiting
//! - Observability (logging, metrics, tracing)

mod handlers;
mod middleware;

use axum::{
    extract::Request,
    middleware::Next,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace::TracerProvider, Resource};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use waypoint_common::{
    config::{AppConfig, ObservabilityConfig},
    metrics,
};
use waypoint_engine::{Dependencies, QueryPipeline};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub deps: Arc<Dependencies>,
    pub pipeline: Arc<QueryPipeline>,
    pub prometheus: Option<PrometheusHandle>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    let config = Arc::new(config);

    let otel_enabled = init_tracing(&config.observability)?;

    info!("Starting Waypoint API Gateway v{}", waypoint_common::VERSION);

    // Initialize metrics
    let prometheus = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed, /metrics disabled");
            None
        }
    };
    metrics::register_metrics();

    // Wire the engine
    let deps = Arc::new(Dependencies::new(config.clone()));
    let pipeline = deps.pipeline().await?;

    let state = AppState {
        config: config.clone(),
        deps,
        pipeline,
        prometheus,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if otel_enabled {
        opentelemetry::global::shutdown_tracer_provider();
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Install the global subscriber. Returns whether OTLP export is active.
fn init_tracing(obs: &ObservabilityConfig) -> Result<bool, Box<dyn std::error::Error>> {
    let otel_layer = match obs.otel_endpoint.as_deref() {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()?;
            let provider = TracerProvider::builder()
                .with_batch_exporter(exporter, runtime::Tokio)
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    obs.service_name.clone(),
                )]))
                .build();
            let tracer = provider.tracer(obs.service_name.clone());
            opentelemetry::global::set_tracer_provider(provider);
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };
    let otel_enabled = otel_layer.is_some();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&obs.log_level));

    let (json, text) = if obs.json_logging {
        (Some(fmt::layer().json().with_target(true)), None)
    } else {
        (None, Some(fmt::layer().with_target(true)))
    };

    tracing_subscriber::registry()
        .with(otel_layer)
        .with(filter)
        .with(json)
        .with(text)
        .init();

    Ok(otel_enabled)
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let mut api_routes = Router::new()
        .route("/query", post(handlers::query::query))
        .route("/stats", get(handlers::stats::stats))
        .route("/stats/reset", post(handlers::stats::reset));

    let limits = &state.config.rate_limit;
    if limits.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(limits.requests_per_second, limits.burst);
        api_routes = api_routes.layer(axum::middleware::from_fn(move |req: Request, next: Next| {
            middleware::rate_limit::rate_limit_middleware(req, next, limiter.clone())
        }));
    }

    // Compose the app
    Router::new()
        // Probes stay outside the rate limit
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/metrics", get(handlers::stats::prometheus))
        .nest("/v1", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(request_id)
                .layer(TraceLayer::new_for_http())
                .layer(propagate_id)
                .layer(cors),
        )
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
