//! HTTP server implementation using Axum.

use crate::handler::{handle_health, handle_object_rpc, handle_rpc};
use axum::{extract::DefaultBodyLimit, routing::get, Router};
use objrpc::{Server, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    pub server: Arc<Server>,
}

/// Normalize a delivery path to a leading slash and no trailing slash.
fn normalize_base(base_path: &str) -> String {
    let trimmed = base_path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

/// Build the router: `/health`, the base path, and `<base>/:objid`.
///
/// Both GET and POST carry a request body to the dispatcher.
pub fn router(server: Arc<Server>, base_path: &str) -> Router {
    let state = Arc::new(AppState { server });
    let base = normalize_base(base_path);
    let root_route = if base.is_empty() { "/".to_string() } else { base.clone() };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(&root_route, get(handle_rpc).post(handle_rpc))
        .route(
            &format!("{}/:objid", base),
            get(handle_object_rpc).post(handle_object_rpc),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(ServerConfig::MAX_BODY_SIZE)),
        )
        .with_state(state)
}

/// Start the HTTP binding.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    server: Arc<Server>,
    host: &str,
    port: u16,
    base_path: &str,
) -> anyhow::Result<SocketAddr> {
    let app = router(server, base_path);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}
