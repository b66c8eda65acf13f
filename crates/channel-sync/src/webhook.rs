//! Inbound webhook handling.

use std::sync::Arc;

use common::ChannelId;
use serde::Serialize;
use serde_json::Value;

use crate::error::{SyncError, WebhookError};
use crate::events::ChannelEvent;
use crate::orchestrator::{ConflictOutcome, SyncOrchestrator, WebhookTarget};

/// Rate-limit resource consumed by each accepted webhook.
pub const WEBHOOK_RESOURCE: &str = "webhook";

/// What processing one webhook produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WebhookOutcome {
    pub records: usize,
    pub conflicts: Vec<ConflictOutcome>,
}

/// Accepts channel webhooks and feeds their records through conflict
/// detection.
///
/// A payload is either a single record in the channel's field names or an
/// object with an `items` array of such records.
#[derive(Clone)]
pub struct WebhookIngestor {
    orchestrator: Arc<SyncOrchestrator>,
}

impl WebhookIngestor {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Validates a webhook and processes it in the background.
    ///
    /// Returns once the webhook is accepted; processing failures are
    /// published as `webhook:error` events rather than returned.
    #[tracing::instrument(skip(self, payload), fields(channel_id = %channel_id))]
    pub fn accept(
        &self,
        channel_id: &ChannelId,
        topic: &str,
        payload: Value,
    ) -> Result<(), WebhookError> {
        let target = self.admit(channel_id)?;

        let ingestor = self.clone();
        let channel_id = channel_id.clone();
        let topic = topic.to_string();
        tokio::spawn(async move {
            let _ = ingestor.process(&channel_id, &topic, &payload, target).await;
        });
        Ok(())
    }

    /// Validates and processes a webhook before returning.
    #[tracing::instrument(skip(self, payload), fields(channel_id = %channel_id))]
    pub async fn handle_webhook(
        &self,
        channel_id: &ChannelId,
        topic: &str,
        payload: &Value,
    ) -> Result<WebhookOutcome, WebhookError> {
        let target = self.admit(channel_id)?;
        self.process(channel_id, topic, payload, target).await
    }

    fn admit(&self, channel_id: &ChannelId) -> Result<WebhookTarget, WebhookError> {
        let target = self.orchestrator.webhook_target(channel_id)?;
        self.orchestrator
            .limiter()
            .try_acquire(channel_id, WEBHOOK_RESOURCE)
            .map_err(|e| match e {
                SyncError::RateLimitExceeded { retry_after, .. } => WebhookError::RateLimited {
                    channel_id: channel_id.clone(),
                    retry_after,
                },
                other => WebhookError::Sync(other),
            })?;

        metrics::counter!("webhooks_received_total").increment(1);
        Ok(target)
    }

    async fn process(
        &self,
        channel_id: &ChannelId,
        topic: &str,
        payload: &Value,
        target: WebhookTarget,
    ) -> Result<WebhookOutcome, WebhookError> {
        match self.apply(channel_id, payload, &target).await {
            Ok(outcome) => {
                tracing::info!(
                    records = outcome.records,
                    conflicts = outcome.conflicts.len(),
                    "webhook processed"
                );
                self.orchestrator
                    .publish(ChannelEvent::WebhookProcessed {
                        channel_id: channel_id.clone(),
                        topic: topic.to_string(),
                        records: outcome.records,
                        conflicts: outcome.conflicts.len(),
                    })
                    .await;
                Ok(outcome)
            }
            Err(e) => {
                metrics::counter!("webhooks_failed_total").increment(1);
                tracing::error!(error = %e, "webhook processing failed");
                self.orchestrator
                    .publish(ChannelEvent::WebhookError {
                        channel_id: channel_id.clone(),
                        topic: topic.to_string(),
                        error: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn apply(
        &self,
        channel_id: &ChannelId,
        payload: &Value,
        target: &WebhookTarget,
    ) -> Result<WebhookOutcome, WebhookError> {
        let items = match payload.get("items") {
            Some(Value::Array(items)) => items.iter().collect::<Vec<_>>(),
            Some(_) => {
                return Err(WebhookError::InvalidPayload(
                    "'items' must be an array".to_string(),
                ));
            }
            None => vec![payload],
        };

        let records = items
            .into_iter()
            .map(|item| target.mapping.map_record(item))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

        let mut outcome = WebhookOutcome {
            records: records.len(),
            conflicts: Vec::new(),
        };
        for record in &records {
            let result = self
                .orchestrator
                .reconcile_record(channel_id, record, target.strategy)
                .await?;
            outcome.conflicts.extend(result.conflict);
        }
        Ok(outcome)
    }
}
