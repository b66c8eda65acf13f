use super::{
    InventoryAction, InventoryCompensation, InventorySagaEvent, InventorySagaResult, InventoryStep,
    Order, SagaContext,
};
use crate::error::Result;

/// Ships reserved stock for an order.
///
/// Nothing is shipped unless the order's own reservations cover every line.
/// Each shipped line is undone by restoring both quantity and reservation.
pub struct FulfillmentSaga {
    ctx: SagaContext,
}

impl FulfillmentSaga {
    pub const SAGA_TYPE: &'static str = "Fulfillment";

    pub fn new(ctx: SagaContext) -> Self {
        Self { ctx }
    }

    pub fn steps(order: &Order) -> Vec<InventoryStep> {
        let mut steps = Vec::with_capacity(order.lines.len() + 1);
        steps.push(InventoryStep::new(
            "Validate reservations",
            InventoryAction::ValidateReservations {
                reference_id: order.order_id.clone(),
                lines: order.lines.clone(),
            },
        ));
        steps.extend(order.lines.iter().enumerate().map(|(i, line)| {
            InventoryStep::new(
                format!("Ship item {}", i + 1),
                InventoryAction::ShipReserved {
                    product_id: line.product_id.clone(),
                    quantity: line.quantity,
                    reference_id: order.order_id.clone(),
                },
            )
            .with_compensation(InventoryCompensation::RestoreShipment {
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                reference_id: order.order_id.clone(),
            })
        }));
        steps
    }

    #[tracing::instrument(skip(self, order), fields(order_id = %order.order_id))]
    pub async fn run(&self, order: &Order) -> Result<InventorySagaResult> {
        order.validate()?;

        let steps = Self::steps(order);
        let result = self.ctx.execute(Self::SAGA_TYPE, &steps, None).await;

        let event = if result.success {
            InventorySagaEvent::InventoryFulfilled {
                order_id: order.order_id.clone(),
                lines: order.lines.clone(),
            }
        } else {
            InventorySagaEvent::InventoryFulfillmentFailed {
                order_id: order.order_id.clone(),
                error: result.error_message().unwrap_or_default(),
                compensated_steps: result.compensated_steps.clone(),
            }
        };
        self.ctx.publish(&order.order_id, "Order", &event).await;

        Ok(result)
    }
}
