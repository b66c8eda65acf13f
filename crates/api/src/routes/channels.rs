//! Channel management, manual sync and webhook endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use channel_sync::{
    Channel, ChannelSettings, ChannelType, HealthStatus, SyncOptions, SyncReport, WebhookError,
};
use common::{ChannelId, ProductId};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct ConnectChannelRequest {
    pub channel_id: String,
    pub channel_type: ChannelType,
    #[serde(default)]
    pub settings: ChannelSettings,
}

#[derive(Debug, Deserialize)]
pub struct WebhookParams {
    pub topic: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct ChannelResponse {
    #[serde(flatten)]
    pub channel: Channel,
    pub scheduled: bool,
    pub pending_corrections: Vec<ProductId>,
}

#[derive(Serialize)]
pub struct WebhookAcceptedResponse {
    pub status: &'static str,
    pub channel_id: String,
    pub topic: String,
}

impl ChannelResponse {
    fn new(state: &AppState, channel: Channel) -> Self {
        Self {
            scheduled: state.scheduler.scheduled().contains(&channel.id),
            pending_corrections: state.orchestrator.pending_corrections(&channel.id),
            channel,
        }
    }
}

// -- Handlers --

/// POST /channels — connect a channel and schedule its periodic sync.
#[tracing::instrument(skip(state, req), fields(channel_id = %req.channel_id))]
pub async fn connect(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConnectChannelRequest>,
) -> Result<(StatusCode, Json<ChannelResponse>), ApiError> {
    if req.channel_id.trim().is_empty() {
        return Err(ApiError::BadRequest("channel_id is required".to_string()));
    }

    let channel_id = ChannelId::new(req.channel_id.trim());
    let adapter = state.adapters.create(&channel_id, &req.channel_type);
    let channel = state
        .orchestrator
        .connect_channel(channel_id.clone(), req.channel_type, req.settings, adapter)
        .await?;

    if channel.is_schedulable() {
        state.scheduler.schedule(&channel_id)?;
    }

    Ok((
        StatusCode::CREATED,
        Json(ChannelResponse::new(&state, channel)),
    ))
}

/// GET /channels — list registered channels.
pub async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<ChannelResponse>> {
    let channels = state
        .orchestrator
        .channels()
        .into_iter()
        .map(|channel| ChannelResponse::new(&state, channel))
        .collect();
    Json(channels)
}

/// GET /channels/{channel_id} — status, settings, metrics and last sync.
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
) -> Result<Json<ChannelResponse>, ApiError> {
    let channel = state
        .orchestrator
        .channel(&ChannelId::new(channel_id.as_str()))
        .ok_or_else(|| ApiError::NotFound(format!("Channel not found: {channel_id}")))?;
    Ok(Json(ChannelResponse::new(&state, channel)))
}

/// DELETE /channels/{channel_id} — stop syncing and disconnect.
#[tracing::instrument(skip(state))]
pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
) -> Result<Json<ChannelResponse>, ApiError> {
    let channel_id = ChannelId::new(channel_id);
    state.scheduler.unschedule(&channel_id);
    let channel = state.orchestrator.disconnect_channel(&channel_id).await?;
    Ok(Json(ChannelResponse::new(&state, channel)))
}

/// GET /channels/{channel_id}/health — probe the channel API.
pub async fn health(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
) -> Result<Json<HealthStatus>, ApiError> {
    let status = state
        .orchestrator
        .check_channel_health(&ChannelId::new(channel_id))
        .await?;
    Ok(Json(status))
}

/// POST /channels/{channel_id}/sync — run a manual sync and return its report.
#[tracing::instrument(skip(state, options))]
pub async fn sync(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
    Json(options): Json<SyncOptions>,
) -> Result<Json<SyncReport>, ApiError> {
    let channel_id = ChannelId::new(channel_id);
    let report = state.orchestrator.sync_channel(&channel_id, options).await?;
    Ok(Json(report))
}

/// POST /channels/{channel_id}/webhook?topic=... — accept a channel push.
///
/// Answers 200 once the webhook is queued. Processing happens afterwards.
#[tracing::instrument(skip(state, body))]
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
    Query(params): Query<WebhookParams>,
    body: Bytes,
) -> Result<Json<WebhookAcceptedResponse>, ApiError> {
    let channel_id = ChannelId::new(channel_id);
    let topic = params.topic.unwrap_or_else(|| "unknown".to_string());
    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

    state.ingestor.accept(&channel_id, &topic, payload)?;

    Ok(Json(WebhookAcceptedResponse {
        status: "accepted",
        channel_id: channel_id.to_string(),
        topic,
    }))
}
