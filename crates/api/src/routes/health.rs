//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use channel_sync::ChannelStatus;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub channels: usize,
    pub channels_in_error: usize,
    pub pending_reviews: usize,
}

/// GET /health — returns service health and a channel summary.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let channels = state.orchestrator.channels();
    let channels_in_error = channels
        .iter()
        .filter(|c| c.status == ChannelStatus::Error)
        .count();

    Json(HealthResponse {
        status: "ok",
        channels: channels.len(),
        channels_in_error,
        pending_reviews: state.orchestrator.reviews().len(),
    })
}
