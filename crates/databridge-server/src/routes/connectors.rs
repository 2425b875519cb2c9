//! Connector registry routes: list registered connectors, register a new
//! one from a connection URI, and discover its current schema snapshot.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use databridge_core::error::CoreError;
use databridge_core::schema::{SchemaDiscoverer, SchemaSnapshot};

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list).post(register))
        .route("/{id}/schema", get(schema))
}

async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.registry.ids())
}

#[derive(Deserialize)]
struct RegisterRequest {
    id: String,
    uri: String,
    username: String,
    password: String,
    #[serde(default)]
    tls: bool,
    #[serde(default = "default_pool_min")]
    pool_min: usize,
    #[serde(default = "default_pool_max")]
    pool_max: usize,
}

fn default_pool_min() -> usize {
    1
}

fn default_pool_max() -> usize {
    10
}

#[derive(Serialize)]
struct RegisterResponseBody {
    id: String,
    backend: &'static str,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponseBody>, AppError> {
    let connector = state
        .registry
        .register_from_uri(
            req.id.clone(),
            &req.uri,
            req.username,
            req.password,
            req.tls,
            req.pool_min,
            req.pool_max,
        )
        .map_err(CoreError::Registry)?;

    state.monitor.register(Arc::clone(&connector));

    Ok(Json(RegisterResponseBody {
        id: req.id,
        backend: connector.backend().as_str(),
    }))
}

async fn schema(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SchemaSnapshot>, AppError> {
    let connector = state
        .registry
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("no connector registered for id '{id}'")))?;

    let snapshot = SchemaDiscoverer::discover(connector.as_ref())
        .await
        .map_err(CoreError::Schema)?;

    Ok(Json(snapshot))
}
