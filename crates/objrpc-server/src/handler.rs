//! HTTP request handlers.
//!
//! The body of every delivery-route request goes to the dispatcher as raw
//! bytes, whatever the HTTP method. Dispatch runs on the blocking pool since
//! exposed methods are ordinary synchronous code.

use crate::server::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

/// Liveness probe.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Requests addressed to the API root.
pub async fn handle_rpc(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    dispatch(state, None, body).await
}

/// Requests addressed to a registered object by id.
pub async fn handle_object_rpc(
    State(state): State<Arc<AppState>>,
    Path(objid): Path<String>,
    body: Bytes,
) -> Response {
    dispatch(state, Some(objid), body).await
}

async fn dispatch(state: Arc<AppState>, sub_path: Option<String>, body: Bytes) -> Response {
    debug!(
        "RPC request for {} ({} bytes)",
        sub_path.as_deref().unwrap_or("root"),
        body.len()
    );

    let server = state.server.clone();
    let joined =
        tokio::task::spawn_blocking(move || server.handle_path(sub_path.as_deref(), &body)).await;

    match joined {
        Ok(text) if text.is_empty() => StatusCode::NO_CONTENT.into_response(),
        Ok(text) => ([(header::CONTENT_TYPE, "application/json")], text).into_response(),
        Err(e) => {
            error!("Dispatch task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
