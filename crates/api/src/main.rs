//! API server entry point.

use std::sync::Arc;

use api::adapters::InMemoryAdapterFactory;
use api::config::{Config, LogFormat};
use api::listener::SyncRequestListener;
use event_bus::{EventTransport, InMemoryEventTransport, PostgresEventTransport};
use saga::SagaCoordinator;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn create_transport(config: &Config) -> Arc<dyn EventTransport> {
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to database");
            let transport = PostgresEventTransport::new(pool);
            transport
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using postgres event transport");
            Arc::new(transport)
        }
        None => {
            tracing::info!("using in-memory event transport");
            Arc::new(InMemoryEventTransport::new())
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env().expect("invalid configuration");
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Wire the transport, engine, sagas and channel sync
    let transport = create_transport(&config).await;
    let services = api::create_services(
        &config,
        transport.clone(),
        Arc::new(InMemoryAdapterFactory::new()),
        metrics_handle,
    );
    let state = services.state.clone();

    // 4. Start background consumers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let coordinator = SagaCoordinator::new(services.sagas).spawn(shutdown_rx.clone());
    let listener = SyncRequestListener::new(state.orchestrator.clone(), transport.as_ref())
        .spawn(shutdown_rx.clone());
    let limiter_cleanup = state.orchestrator.limiter().clone().spawn_cleanup(shutdown_rx);

    // 5. Start server
    let app = api::create_app(state.clone());
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let tcp = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(tcp, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 6. Stop schedules and consumers
    state.scheduler.stop().await;
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(coordinator, listener, limiter_cleanup);

    tracing::info!("server shut down gracefully");
}
