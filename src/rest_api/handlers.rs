//! Request handlers

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use prometheus_client::encoding::text::encode;
use serde::Serialize;
use tracing::error;

use crate::controller::{metrics, ControllerState, SweepSummary};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub block_miss: u64,
    /// `None` until the first sweep has finished
    pub last_sweep: Option<SweepSummary>,
}

pub async fn health(State(state): State<Arc<ControllerState>>) -> Json<HealthResponse> {
    let last_sweep = state.last_sweep.read().await.clone();

    Json(HealthResponse {
        status: "ok",
        block_miss: state.block_miss,
        last_sweep,
    })
}

pub async fn metrics() -> (StatusCode, String) {
    let mut buffer = String::new();
    match encode(&mut buffer, &metrics::REGISTRY) {
        Ok(()) => (StatusCode::OK, buffer),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}
