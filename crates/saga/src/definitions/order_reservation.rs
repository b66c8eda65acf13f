use tokio::sync::watch;

use super::{
    InventoryAction, InventoryCompensation, InventorySagaEvent, InventorySagaResult, InventoryStep,
    Order, SagaContext,
};
use crate::error::Result;

/// Reserves stock for every line of an order, releasing earlier lines if a
/// later one cannot be reserved.
pub struct OrderReservationSaga {
    ctx: SagaContext,
}

impl OrderReservationSaga {
    pub const SAGA_TYPE: &'static str = "OrderReservation";

    pub fn new(ctx: SagaContext) -> Self {
        Self { ctx }
    }

    /// One reserve step per line, named "Reserve inventory for item N".
    pub fn steps(order: &Order) -> Vec<InventoryStep> {
        order
            .lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                InventoryStep::new(
                    format!("Reserve inventory for item {}", i + 1),
                    InventoryAction::ReserveStock {
                        product_id: line.product_id.clone(),
                        quantity: line.quantity,
                        reference_id: order.order_id.clone(),
                    },
                )
                .with_compensation(InventoryCompensation::ReleaseStock {
                    product_id: line.product_id.clone(),
                    quantity: line.quantity,
                    reference_id: order.order_id.clone(),
                })
            })
            .collect()
    }

    /// Runs the saga and publishes its outcome on the order aggregate.
    ///
    /// Returns `Err` only for an invalid order; step failures are reported
    /// in the result.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.order_id))]
    pub async fn run(&self, order: &Order) -> Result<InventorySagaResult> {
        self.run_inner(order, None).await
    }

    pub async fn run_with_cancel(
        &self,
        order: &Order,
        cancel: watch::Receiver<bool>,
    ) -> Result<InventorySagaResult> {
        self.run_inner(order, Some(cancel)).await
    }

    async fn run_inner(
        &self,
        order: &Order,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<InventorySagaResult> {
        order.validate()?;

        let steps = Self::steps(order);
        let result = self.ctx.execute(Self::SAGA_TYPE, &steps, cancel).await;

        let event = if result.success {
            InventorySagaEvent::InventoryReservedForOrder {
                order_id: order.order_id.clone(),
                lines: order.lines.clone(),
            }
        } else {
            InventorySagaEvent::InventoryReservationFailed {
                order_id: order.order_id.clone(),
                error: result.error_message().unwrap_or_default(),
                compensated_steps: result.compensated_steps.clone(),
            }
        };
        self.ctx.publish(&order.order_id, "Order", &event).await;

        Ok(result)
    }
}
