//! Backlog API handlers.
//!
//! Provides:
//! - `GET /destinations`: queued event count for every destination with a backlog
//! - `GET /destinations/{destinationId}/backlog`: queued event count for one destination

use crate::AppState;
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use herald_db::run_blocking;
use herald_queue::QueueError;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::InvalidDestination
            | QueueError::InvalidLimit
            | QueueError::InvalidEvent(_) => ApiError::BadRequest(e.to_string()),
            e if e.is_retryable() => ApiError::Unavailable(e.to_string()),
            e => ApiError::InternalServerError(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Queued event count for one destination.
#[derive(Debug, Serialize)]
pub struct BacklogEntry {
    #[serde(rename = "destinationId")]
    pub destination_id: String,
    pub queued: u64,
}

/// Response for `GET /destinations`.
#[derive(Debug, Serialize)]
pub struct BacklogResponse {
    pub destinations: Vec<BacklogEntry>,
}

/// Handler for `GET /destinations`.
pub async fn list_backlog_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<BacklogResponse>, ApiError> {
    let store = state.store.clone();
    let backlog = run_blocking(&state.pool, state.operation_timeout, move |conn| {
        store.backlog(conn)
    })
    .await?;

    let destinations = backlog
        .into_iter()
        .map(|(destination_id, queued)| BacklogEntry {
            destination_id,
            queued,
        })
        .collect();

    Ok(Json(BacklogResponse { destinations }))
}

/// Handler for `GET /destinations/{destinationId}/backlog`.
///
/// Unknown destinations report zero queued events.
pub async fn destination_backlog_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(destination_id): Path<String>,
) -> Result<Json<BacklogEntry>, ApiError> {
    if destination_id.trim().is_empty() {
        return Err(QueueError::InvalidDestination.into());
    }

    let store = state.store.clone();
    let lookup_id = destination_id.clone();
    let queued = run_blocking(&state.pool, state.operation_timeout, move |conn| {
        store.count_by_destination(conn, &lookup_id)
    })
    .await?;

    Ok(Json(BacklogEntry {
        destination_id,
        queued,
    }))
}
