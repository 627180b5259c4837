//! Herald server library logic.

pub mod api;
pub mod config;
pub mod delivery;
pub mod worker;

use axum::{routing::get, Extension, Json, Router};
use herald_db::DbPool;
use herald_queue::EventQueueStore;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// The appservice event queue.
    pub store: EventQueueStore,
    /// Deadline applied to each queue operation a handler runs.
    pub operation_timeout: Option<Duration>,
}

/// Health check handler.
///
/// Returns `200 OK` with server status and version.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/destinations", get(api::list_backlog_handler))
        .route(
            "/destinations/{destinationId}/backlog",
            get(api::destination_backlog_handler),
        )
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
