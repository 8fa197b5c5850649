//! Local status surface
//!
//! Optional HTTP listener for scripts and status bars that cannot host the
//! tray. Read-only: it serves snapshots, never mutates state.
//!
//! - `GET /health`  : liveness plus link status
//! - `GET /state`   : full `AccountState` as JSON
//! - `GET /menu`    : the tray menu model as JSON
//! - `GET /metrics` : Prometheus text exposition

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use reconciler::{Reconciler, build_menu};

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

/// Build the router. Concurrency is capped at `max_connections`.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/state", get(state_handler))
        .route("/menu", get(menu_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.reconciler.snapshot().await;
    axum::Json(serde_json::json!({
        "status": "healthy",
        "link_status": snapshot.status.as_str(),
        "account": state.reconciler.username(),
        "auto_manage": state.reconciler.auto_manage(),
        "last_status_check": snapshot.last_status_check,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

async fn state_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.reconciler.snapshot().await)
}

async fn menu_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.reconciler.snapshot().await;
    axum::Json(build_menu(
        &snapshot,
        state.reconciler.username(),
        state.reconciler.auto_manage(),
        Utc::now(),
    ))
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}
