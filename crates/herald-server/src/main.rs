//! Herald server binary: event ingestion, fan-out workers, and delivery
//! in one process.
//!
//! Starts an axum HTTP/WebSocket server with structured logging, database
//! initialization, the fan-out worker pool, the relay pump, and the
//! reconciliation sweep, with graceful shutdown on SIGTERM/SIGINT.

use herald_server::{app, background, config, AppState};
use herald_queue::WorkSignal;
use herald_relay::{NotificationBus, SessionRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("HERALD_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Initialize database (pool + migrations)
    let pool = herald_db::open(
        &config.database.path,
        herald_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to open database — check database.path in config");

    // Build shared state
    let worker_settings = config.worker.settings();
    let state = AppState {
        pool: pool.clone(),
        registry: SessionRegistry::new(),
        bus: NotificationBus::new(config.relay.bus_capacity),
        work_signal: WorkSignal::new(),
        worker_settings,
    };
    let shared = Arc::new(state.clone());

    // The relay pump must subscribe before any worker publishes, so live
    // delivery starts from the first processed job.
    tokio::spawn(background::start_relay_pump(shared.clone()));

    // Fan-out worker pool
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handles = herald_fanout::spawn_workers(
        pool.clone(),
        state.bus.clone(),
        state.work_signal.clone(),
        worker_settings,
        shutdown_rx,
    );
    tracing::info!(
        concurrency = worker_settings.concurrency,
        "fanout worker pool started"
    );

    // Reconciliation sweep
    tokio::spawn(background::start_reconciliation_task(
        shared.clone(),
        config.sweep.interval_secs,
        config.sweep.pending_age_secs,
    ));

    // Build application
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting herald server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Stop the workers; in-flight leases simply expire and would be
    // reclaimed on the next start.
    let _ = shutdown_tx.send(true);
    for handle in worker_handles {
        let _ = handle.await;
    }

    tracing::info!("herald server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
