//! HTTP API server for the channel inventory allocator.
//!
//! Provides REST endpoints for channel management, manual syncs, webhook
//! ingestion and conflict review, with structured logging (tracing) and
//! Prometheus metrics.

pub mod adapters;
pub mod config;
pub mod error;
pub mod listener;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use channel_sync::{RateLimiter, SyncOrchestrator, SyncScheduler, WebhookIngestor};
use event_bus::EventTransport;
use inventory::{AllocationEngine, ConflictResolver, InMemoryStockLedger};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::SagaContext;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use adapters::AdapterFactory;
use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub scheduler: Arc<SyncScheduler>,
    pub ingestor: WebhookIngestor,
    pub adapters: Arc<dyn AdapterFactory>,
    pub metrics: PrometheusHandle,
}

/// Everything the binary wires together.
pub struct Services {
    pub state: Arc<AppState>,
    pub sagas: SagaContext,
}

/// Builds the allocation engine, sagas and channel sync on top of a
/// transport.
pub fn create_services(
    config: &Config,
    transport: Arc<dyn EventTransport>,
    adapters: Arc<dyn AdapterFactory>,
    metrics: PrometheusHandle,
) -> Services {
    let ledger = Arc::new(InMemoryStockLedger::new());
    let engine = Arc::new(AllocationEngine::new(ledger, transport.clone()));

    let orchestrator = Arc::new(
        SyncOrchestrator::new(engine.clone(), transport.clone())
            .with_resolver(ConflictResolver::new(config.conflict.clone()))
            .with_rate_limiter(Arc::new(RateLimiter::new(config.rate_limit.clone())))
            .with_config(config.sync_config()),
    );
    let sagas = SagaContext::new(engine, transport, config.executor);

    let state = Arc::new(AppState {
        scheduler: Arc::new(SyncScheduler::new(orchestrator.clone())),
        ingestor: WebhookIngestor::new(orchestrator.clone()),
        orchestrator,
        adapters,
        metrics,
    });

    Services { state, sagas }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::check))
        .route("/metrics", get(routes::metrics::get))
        .route(
            "/channels",
            get(routes::channels::list).post(routes::channels::connect),
        )
        .route(
            "/channels/{channel_id}",
            get(routes::channels::get).delete(routes::channels::disconnect),
        )
        .route(
            "/channels/{channel_id}/health",
            get(routes::channels::health),
        )
        .route("/channels/{channel_id}/sync", post(routes::channels::sync))
        .route(
            "/channels/{channel_id}/webhook",
            post(routes::channels::webhook),
        )
        .route("/reviews", get(routes::reviews::list))
        .route("/reviews/{review_id}/resolve", post(routes::reviews::resolve))
        .route(
            "/products/{product_id}/resolve",
            post(routes::reviews::resolve_product),
        )
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
