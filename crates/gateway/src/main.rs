//! DocSage API Gateway
//!
//! The entry point for documentation questions.
//! Handles:
//! - Streaming chat answers over server-sent events
//! - Rate limiting
//! - Request routing
//! - Observability (logging, metrics, request ids)

mod handlers;
mod middleware;

use anyhow::Context as _;
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use docsage_common::{
    config::{AppConfig, ObservabilityConfig},
    db::DbPool,
    metrics,
};
use docsage_context::Orchestrator;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::oneshot;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Option<DbPool>,
    pub orchestrator: Arc<Orchestrator>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Configuration comes first: it carries the log level
    let config = AppConfig::load().context("failed to load configuration")?;

    init_tracing(&config.observability);

    info!(
        service = %config.observability.service_name,
        "Starting DocSage API Gateway v{}",
        docsage_common::VERSION
    );

    config.validate().map_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        e
    })?;
    let config = Arc::new(config);

    // Initialize metrics
    init_metrics(&config.observability)?;

    // The documentation store is only needed by the postgres search backend
    let db = match &config.database {
        Some(database) => Some(DbPool::new(database).await?),
        None => None,
    };

    let orchestrator = Arc::new(Orchestrator::from_config(&config, db.clone())?);

    // Create app state
    let state = AppState {
        config: config.clone(),
        db,
        orchestrator,
    };

    // Build the router
    let app = create_router(state)?;

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server.host/server.port")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (signalled_tx, signalled_rx) = oneshot::channel();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = signalled_tx.send(());
        })
        .into_future();

    drain_with_deadline(server, signalled_rx, config.shutdown_timeout()).await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init_metrics(observability: &ObservabilityConfig) -> anyhow::Result<()> {
    metrics::register_metrics();

    if observability.metrics_port == 0 {
        info!("Prometheus exporter disabled");
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], observability.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("request_duration_seconds".to_string()),
            metrics::LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("stage_duration_seconds".to_string()),
            metrics::STAGE_BUCKETS,
        )?
        .install()
        .context("failed to install Prometheus exporter")?;

    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> docsage_common::Result<Router> {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // Question endpoints, rate limited
    let mut question_routes = Router::new()
        .route("/chat", post(handlers::chat::chat))
        .route("/ask", post(handlers::chat::ask));

    if state.config.rate_limit.enabled {
        let limit = middleware::rate_limit::create_rate_limiter(&state.config.rate_limit)?;
        question_routes = question_routes.route_layer(from_fn_with_state(
            limit,
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    // API routes
    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .merge(question_routes)
        .route_layer(from_fn(middleware::metrics::track_metrics));

    // Compose the app
    Ok(Router::new()
        .nest("/v1", api_routes)
        .layer(GlobalConcurrencyLimitLayer::new(state.config.server.max_concurrent_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

/// Drive the server to completion. Once shutdown has been signalled,
/// in-flight requests get `deadline` to finish before they are dropped.
async fn drain_with_deadline<F>(
    server: F,
    signalled: oneshot::Receiver<()>,
    deadline: Duration,
) -> std::io::Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    let mut server = std::pin::pin!(server);

    tokio::select! {
        result = &mut server => result,
        Ok(()) = signalled => {
            match tokio::time::timeout(deadline, &mut server).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        deadline_secs = deadline.as_secs(),
                        "Shutdown deadline passed, dropping in-flight requests"
                    );
                    Ok(())
                }
            }
        }
    }
}
