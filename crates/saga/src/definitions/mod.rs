//! Inventory sagas built on the generic executor.
//!
//! Each saga turns its input into a list of [`InventoryStep`]s, runs them
//! through the shared [`InventoryStepInterpreter`] and publishes its outcome.

mod bulk_transfer;
mod events;
mod fulfillment;
mod interpreter;
mod multi_channel;
mod order_reservation;
mod rebalance;

use std::sync::Arc;

use common::ProductId;
use event_bus::{EventTransport, EventTransportExt};
use inventory::AllocationEngine;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::SagaError;
use crate::executor::{ExecutorConfig, SagaExecutor, SagaResult, SagaStep};

pub use bulk_transfer::{BulkTransferSaga, StockTransfer};
pub use events::InventorySagaEvent;
pub use fulfillment::FulfillmentSaga;
pub use interpreter::{InventoryAction, InventoryCompensation, InventoryStepInterpreter, StepOutput};
pub use multi_channel::{ChannelRequest, MultiChannelAllocationSaga};
pub use order_reservation::OrderReservationSaga;
pub use rebalance::RebalanceSaga;

/// A step over inventory actions.
pub type InventoryStep = SagaStep<InventoryAction, InventoryCompensation>;

/// Result of an inventory saga.
pub type InventorySagaResult = SagaResult<StepOutput>;

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl OrderLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// An order as seen by the inventory sagas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// External order id; also the ledger reservation reference.
    pub order_id: String,
    pub lines: Vec<OrderLine>,
}

impl Order {
    pub fn new(order_id: impl Into<String>, lines: Vec<OrderLine>) -> Self {
        Self {
            order_id: order_id.into(),
            lines,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SagaError> {
        if self.order_id.is_empty() {
            return Err(SagaError::Validation("order id is required".to_string()));
        }
        if self.lines.is_empty() {
            return Err(SagaError::Validation(format!(
                "order {} has no lines",
                self.order_id
            )));
        }
        if let Some(line) = self.lines.iter().find(|l| l.quantity == 0) {
            return Err(SagaError::Validation(format!(
                "order {} has zero quantity for {}",
                self.order_id, line.product_id
            )));
        }
        Ok(())
    }
}

/// Shared dependencies of the inventory sagas.
#[derive(Clone)]
pub struct SagaContext {
    executor: SagaExecutor,
    interpreter: Arc<InventoryStepInterpreter>,
    transport: Arc<dyn EventTransport>,
}

impl SagaContext {
    pub fn new(
        engine: Arc<AllocationEngine>,
        transport: Arc<dyn EventTransport>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            executor: SagaExecutor::new(config),
            interpreter: Arc::new(InventoryStepInterpreter::new(engine)),
            transport,
        }
    }

    pub fn engine(&self) -> &Arc<AllocationEngine> {
        self.interpreter.engine()
    }

    pub fn transport(&self) -> &Arc<dyn EventTransport> {
        &self.transport
    }

    pub(crate) async fn execute(
        &self,
        saga_type: &str,
        steps: &[InventoryStep],
        cancel: Option<watch::Receiver<bool>>,
    ) -> InventorySagaResult {
        let result = match cancel {
            Some(cancel) => {
                self.executor
                    .execute_with_cancel(saga_type, self.interpreter.as_ref(), steps, cancel)
                    .await
            }
            None => {
                self.executor
                    .execute(saga_type, self.interpreter.as_ref(), steps)
                    .await
            }
        };

        if result.needs_reconciliation() {
            let event = InventorySagaEvent::SagaCompensationIncomplete {
                saga_id: result.saga_id,
                saga_type: saga_type.to_string(),
                error: result.error_message().unwrap_or_default(),
                failures: result.compensation_failures.clone(),
            };
            self.publish(&result.saga_id.to_string(), "Saga", &event)
                .await;
        }
        result
    }

    /// Publishes a saga outcome. The saga has already run, so a lost event
    /// is logged rather than returned.
    pub(crate) async fn publish(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        event: &InventorySagaEvent,
    ) {
        use event_bus::DomainEvent;

        if let Err(e) = self
            .transport
            .emit(aggregate_id, aggregate_type, event)
            .await
        {
            tracing::error!(error = %e, event_type = event.event_type(), "failed to publish saga event");
            metrics::counter!("event_publish_failures_total").increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_validation() {
        assert!(Order::new("ORD-1", vec![OrderLine::new("SKU-001", 1)])
            .validate()
            .is_ok());
        assert!(Order::new("ORD-1", vec![]).validate().is_err());
        assert!(Order::new("", vec![OrderLine::new("SKU-001", 1)])
            .validate()
            .is_err());
        assert!(Order::new("ORD-1", vec![OrderLine::new("SKU-001", 0)])
            .validate()
            .is_err());
    }

    #[test]
    fn test_order_deserializes_from_event_payload() {
        let order: Order = serde_json::from_value(serde_json::json!({
            "order_id": "ORD-1",
            "lines": [{"product_id": "SKU-001", "quantity": 2}]
        }))
        .unwrap();
        assert_eq!(order.lines[0], OrderLine::new("SKU-001", 2));
    }
}
