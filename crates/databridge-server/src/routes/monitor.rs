//! Connection health and performance alert routes (C11).

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use databridge_core::monitor::{ConnectionHealth, PerformanceAlert};

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/alerts", get(alerts))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Vec<ConnectionHealth>> {
    Json(state.monitor.sweep().await)
}

async fn alerts(State(state): State<Arc<AppState>>) -> Json<Vec<PerformanceAlert>> {
    Json(state.monitor.drain_alerts())
}
