//! Ops API
//!
//! Minimal observability surface for a running pipeline: liveness and a
//! counter snapshot. The administrative CRUD API lives in a separate
//! service and is not part of this crate.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::metrics::{MetricsSnapshot, PipelineMetrics};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn stats(State(metrics): State<Arc<PipelineMetrics>>) -> Json<MetricsSnapshot> {
    Json(metrics.snapshot())
}

/// Build the ops router.
pub fn build_router(metrics: Arc<PipelineMetrics>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(metrics)
}

/// Serve the ops API until the process exits.
pub async fn run_ops_server(
    host: String,
    port: u16,
    metrics: Arc<PipelineMetrics>,
) -> Result<(), std::io::Error> {
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "ops API listening");
    axum::serve(listener, build_router(metrics)).await
}
