//! Vault lifecycle routes: liveness, seal status, initialization, and
//! unseal share submission.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use databridge_core::seal::SealStatus;

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/seal-status", get(seal_status))
        .route("/init", post(init))
        .route("/unseal", post(unseal))
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

async fn seal_status(State(state): State<Arc<AppState>>) -> Result<Json<SealStatus>, AppError> {
    let status = state.seal_manager.status().await?;
    Ok(Json(status))
}

#[derive(Deserialize)]
struct InitRequest {
    shares: u8,
    threshold: u8,
}

#[derive(Serialize)]
struct InitResponseBody {
    unseal_shares: Vec<String>,
    root_token: String,
}

async fn init(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InitRequest>,
) -> Result<Json<InitResponseBody>, AppError> {
    let result = state.seal_manager.init(req.shares, req.threshold).await?;
    Ok(Json(InitResponseBody {
        unseal_shares: result.unseal_shares,
        root_token: result.root_token,
    }))
}

#[derive(Deserialize)]
struct UnsealRequest {
    share: String,
}

#[derive(Serialize)]
struct UnsealResponseBody {
    sealed: bool,
    threshold: u8,
    submitted: u8,
}

async fn unseal(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UnsealRequest>,
) -> Result<Json<UnsealResponseBody>, AppError> {
    match state.seal_manager.submit_unseal_share(&req.share).await? {
        Some(progress) => Ok(Json(UnsealResponseBody {
            sealed: true,
            threshold: progress.threshold,
            submitted: progress.submitted,
        })),
        None => {
            let status = state.seal_manager.status().await?;
            Ok(Json(UnsealResponseBody {
                sealed: false,
                threshold: status.threshold,
                submitted: status.progress,
            }))
        }
    }
}
