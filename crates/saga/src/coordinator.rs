//! Runs inventory sagas in reaction to published events.

use event_bus::{EventEnvelope, EventSubscription};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::definitions::{InventorySagaResult, Order, OrderReservationSaga, SagaContext};
use crate::error::Result;

/// Event type that starts an order reservation.
pub const ORDER_CREATED: &str = "OrderCreated";

/// Listens on the transport and starts an [`OrderReservationSaga`] for every
/// `OrderCreated` event.
///
/// Events are handled one at a time in publish order.
pub struct SagaCoordinator {
    reservation: OrderReservationSaga,
    subscription: EventSubscription,
}

impl SagaCoordinator {
    /// Subscribes to the context's transport. Only events published after
    /// this call are seen.
    pub fn new(ctx: SagaContext) -> Self {
        let subscription = ctx.transport().subscribe();
        Self {
            reservation: OrderReservationSaga::new(ctx),
            subscription,
        }
    }

    /// Handles one event. Returns `Ok(None)` for events the coordinator does
    /// not react to.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type, aggregate_id = %event.aggregate_id))]
    pub async fn handle_event(&self, event: &EventEnvelope) -> Result<Option<InventorySagaResult>> {
        if event.event_type != ORDER_CREATED {
            return Ok(None);
        }

        let order: Order = event.decode()?;
        let result = self.reservation.run(&order).await?;
        if result.success {
            tracing::info!(order_id = %order.order_id, "order reserved");
        } else {
            tracing::warn!(
                order_id = %order.order_id,
                error = result.error_message().unwrap_or_default(),
                "order reservation failed"
            );
        }
        Ok(Some(result))
    }

    /// Processes events until `shutdown` flips to true or the transport
    /// closes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("saga coordinator started");
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
                    if let Err(e) = self.handle_event(&event).await {
                        tracing::error!(error = %e, event_id = %event.event_id, "failed to handle event");
                        metrics::counter!("saga_trigger_failures_total").increment(1);
                    }
                }
            }
        }
        tracing::info!("saga coordinator stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
