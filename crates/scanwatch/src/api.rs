//! HTTP status API.
//!
//! Read-only endpoints over a running monitor:
//! - `health` - Liveness and adapter state
//! - `metrics` - Current run counters
//! - `openapi` - OpenAPI specification generation

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::state::AppState;

pub mod health;
pub mod metrics;
pub mod openapi;

// Re-export OpenAPI utilities for the gen-openapi binary
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /metrics           - Run counters
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/metrics", get(metrics::get_metrics))
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Bind the status listener.
///
/// Binding happens before the monitor starts so a bad address fails fast.
///
/// # Errors
///
/// Returns the bind error.
pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "status API listening");
    Ok(listener)
}

/// Serve until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}
