//! Manual conflict review endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use channel_sync::{ConflictOutcome, PendingReview};
use common::{AggregateId, ProductId};
use inventory::ResolutionStrategy;
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ResolveReviewRequest {
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct ResolveProductRequest {
    pub strategy: ResolutionStrategy,
}

/// GET /reviews — conflicts waiting for a manual decision, oldest first.
pub async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<PendingReview>> {
    Json(state.orchestrator.reviews().pending())
}

/// POST /reviews/{review_id}/resolve — apply a reviewer's quantity.
#[tracing::instrument(skip(state))]
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Path(review_id): Path<String>,
    Json(req): Json<ResolveReviewRequest>,
) -> Result<Json<ConflictOutcome>, ApiError> {
    let review_id = uuid::Uuid::parse_str(&review_id)
        .map(AggregateId::from_uuid)
        .map_err(|e| ApiError::BadRequest(format!("Invalid review id: {e}")))?;

    let outcome = state
        .orchestrator
        .resolve_review(review_id, req.quantity)
        .await?;
    Ok(Json(outcome))
}

/// POST /products/{product_id}/resolve — re-resolve the latest channel
/// reports for a product with an explicit strategy.
#[tracing::instrument(skip(state))]
pub async fn resolve_product(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
    Json(req): Json<ResolveProductRequest>,
) -> Result<Json<ConflictOutcome>, ApiError> {
    let outcome = state
        .orchestrator
        .resolve_conflict(&ProductId::new(product_id), req.strategy)
        .await?;
    Ok(Json(outcome))
}
