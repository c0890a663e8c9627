pub mod control;
pub mod stream;

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;
use crate::stream::DistributorStats;

pub use stream::mjpeg_stream;

// ============================================================================
// Health & status
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Active camera streams
pub async fn stream_stats(State(state): State<Arc<AppState>>) -> Json<Vec<DistributorStats>> {
    Json(state.streams.stats())
}
