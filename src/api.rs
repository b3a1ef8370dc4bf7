//! Health & Status API endpoints
//!
//! Read-only HTTP surface:
//! - GET /health - Liveness check
//! - GET /metrics - Prometheus metrics
//! - GET /status - Record counts by status, uptime
//! - GET /totals - Locked vs minted supply audit
//! - GET /nodes - Endpoint liveness check

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use crate::db::StatusCounts;
use crate::metrics;
use crate::node_check::{check_nodes, NodeStatus, CHECK_TIMEOUT};
use crate::reconciler::Reconciler;
use crate::totals::{supply_report, SupplyReport};

/// Shared state for the HTTP server
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub started: Instant,
}

/// Status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub max_retries: u32,
    pub records: StatusCounts,
}

/// Liveness check (always returns OK if server is running)
async fn health() -> &'static str {
    "OK"
}

/// Prometheus metrics endpoint
async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

async fn status(State(state): State<AppState>) -> Response {
    let max_retries = state.reconciler.max_retries();
    match state.reconciler.store().status_counts(max_retries).await {
        Ok(records) => Json(StatusResponse {
            status: "ok",
            uptime_seconds: state.started.elapsed().as_secs(),
            max_retries,
            records,
        })
        .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to count records");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "error", "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn totals(State(state): State<AppState>) -> Result<Json<SupplyReport>, Response> {
    supply_report(state.reconciler.registry())
        .await
        .map(Json)
        .map_err(|e| {
            error!(error = %e, "Supply audit failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        })
}

async fn nodes(State(state): State<AppState>) -> Json<Vec<NodeStatus>> {
    Json(check_nodes(state.reconciler.registry(), CHECK_TIMEOUT).await)
}

/// Build the router (separate from `start_api_server` for tests)
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/status", get(status))
        .route("/totals", get(totals))
        .route("/nodes", get(nodes))
        .with_state(state)
}

/// Start the API server
pub async fn start_api_server(addr: SocketAddr, reconciler: Arc<Reconciler>) -> eyre::Result<()> {
    let app = router(AppState {
        reconciler,
        started: Instant::now(),
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server started");

    metrics::UP.set(1.0);

    axum::serve(listener, app).await?;
    Ok(())
}
