//! Herald server binary.
//!
//! Opens the queue database, starts one delivery worker per configured
//! destination, serves the backlog API, and shuts everything down on
//! SIGTERM/SIGINT.

use herald_queue::EventQueueStore;
use herald_server::config::{self, Config};
use herald_server::delivery::{Deliverer, LogDeliverer};
use herald_server::worker::{start_delivery_task, WorkerSettings};
use herald_server::{app, AppState};
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

fn init_tracing(config: &Config) {
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
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration - the server cannot start without valid config");

    init_tracing(&config);

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let pool = herald_db::create_pool(
        &config.database.path,
        herald_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool - check database.path in config");

    let store = {
        let mut conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied =
            herald_db::run_migrations(&mut conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
        EventQueueStore::new(&conn).expect("failed to prepare queue statements")
    };

    // Start one delivery worker per destination.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let deliverer: Arc<dyn Deliverer> = Arc::new(LogDeliverer);
    let settings = WorkerSettings::from(&config.delivery);
    let workers: Vec<_> = config
        .delivery
        .destinations
        .iter()
        .map(|destination_id| {
            tokio::spawn(start_delivery_task(
                pool.clone(),
                store.clone(),
                Arc::clone(&deliverer),
                destination_id.clone(),
                settings,
                shutdown_rx.clone(),
            ))
        })
        .collect();

    if workers.is_empty() {
        tracing::warn!("no delivery destinations configured; serving backlog API only");
    }

    let state = AppState {
        pool,
        store,
        operation_timeout: config.delivery.operation_timeout(),
    };
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting herald server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address - is another process using this port?");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "delivery worker panicked");
        }
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
