//! Runs manual syncs requested over the event transport.

use std::sync::Arc;

use channel_sync::{Result, SYNC_REQUESTED, SyncError, SyncOrchestrator, SyncReport, SyncRequest};
use event_bus::{EventEnvelope, EventSubscription, EventTransport};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Starts a sync for every `ChannelSyncRequested` event.
pub struct SyncRequestListener {
    orchestrator: Arc<SyncOrchestrator>,
    subscription: EventSubscription,
}

impl SyncRequestListener {
    /// Subscribes to `transport`. Only events published after this call are
    /// seen.
    pub fn new(orchestrator: Arc<SyncOrchestrator>, transport: &dyn EventTransport) -> Self {
        Self {
            orchestrator,
            subscription: transport.subscribe(),
        }
    }

    /// Handles one event. Returns `Ok(None)` for other event types.
    #[tracing::instrument(skip(self, event), fields(event_id = %event.event_id))]
    pub async fn handle_event(&self, event: &EventEnvelope) -> Result<Option<SyncReport>> {
        if event.event_type != SYNC_REQUESTED {
            return Ok(None);
        }

        let request: SyncRequest = event.decode()?;
        metrics::counter!("sync_requests_total").increment(1);
        let report = self
            .orchestrator
            .sync_channel(&request.channel_id, request.options)
            .await?;
        Ok(Some(report))
    }

    /// Processes events until `shutdown` flips to true or the transport
    /// closes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("sync request listener started");
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = self.subscription.recv() => {
                    let Some(event) = event else { break };
                    match self.handle_event(&event).await {
                        Ok(_) => {}
                        Err(SyncError::SyncInProgress(channel_id)) => {
                            tracing::info!(channel_id = %channel_id, "sync already running, request dropped");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, event_id = %event.event_id, "requested sync failed");
                        }
                    }
                }
            }
        }
        tracing::info!("sync request listener stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
