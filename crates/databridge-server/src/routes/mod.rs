//! HTTP routes exposed by the `DataBridge` server.
//!
//! Deliberately thin: the data-plane (queries, schema discovery, credential
//! management) lives in `databridge-core` as a library surface. These
//! routes only cover vault lifecycle (seal/unseal), connector registration,
//! and health/monitoring — the minimum an operator needs to drive the core
//! engines over HTTP.

pub mod connectors;
pub mod monitor;
pub mod sys;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Build the full route tree for the server.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/v1/sys", sys::router())
        .nest("/v1/connectors", connectors::router())
        .nest("/v1/monitor", monitor::router())
        .with_state(state)
}
