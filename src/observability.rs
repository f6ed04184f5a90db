//! Scrape/health/ready endpoints (spec §4.9, §6 "Exposed HTTP", AMBIENT-6).
//!
//! Grounded in the teacher's own `axum`-fronted example
//! (`axum-resilient-kv-store`): a small `axum::Router` serving JSON health
//! probes plus a Prometheus text-exposition scrape endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;

use crate::scheduler::Scheduler;

#[derive(Clone)]
pub struct ObservabilityState {
    pub scheduler: Arc<Scheduler>,
    pub prometheus: PrometheusHandle,
}

pub fn router(state: ObservabilityState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health(State(state): State<ObservabilityState>) -> impl IntoResponse {
    let rate_limiting = state.scheduler.rate_limit_snapshot().await;
    Json(json!({
        "status": "healthy",
        "service": "taskworker",
        "rate_limiting": rate_limiting,
    }))
}

async fn ready(State(_state): State<ObservabilityState>) -> impl IntoResponse {
    Json(json!({ "status": "ready" }))
}

async fn metrics(State(state): State<ObservabilityState>) -> impl IntoResponse {
    state.prometheus.render()
}
