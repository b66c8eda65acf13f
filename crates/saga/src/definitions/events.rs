//! Outcome events published by the inventory sagas.

use common::{AggregateId, ChannelId, ProductId};
use event_bus::DomainEvent;
use inventory::ChannelTarget;
use serde::{Deserialize, Serialize};

use super::{OrderLine, StockTransfer};
use crate::executor::CompensationFailure;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InventorySagaEvent {
    InventoryReservedForOrder {
        order_id: String,
        lines: Vec<OrderLine>,
    },
    InventoryReservationFailed {
        order_id: String,
        error: String,
        compensated_steps: Vec<String>,
    },
    StockTransferred {
        saga_id: AggregateId,
        transfers: Vec<StockTransfer>,
    },
    StockTransferFailed {
        saga_id: AggregateId,
        error: String,
        compensated_steps: Vec<String>,
    },
    ChannelAllocationsCompleted {
        product_id: ProductId,
        allocations: Vec<(ChannelId, u32)>,
    },
    ChannelAllocationsFailed {
        product_id: ProductId,
        error: String,
        compensated_steps: Vec<String>,
    },
    RebalanceApplied {
        product_id: ProductId,
        targets: Vec<ChannelTarget>,
    },
    RebalanceFailed {
        product_id: ProductId,
        error: String,
        compensated_steps: Vec<String>,
    },
    InventoryFulfilled {
        order_id: String,
        lines: Vec<OrderLine>,
    },
    InventoryFulfillmentFailed {
        order_id: String,
        error: String,
        compensated_steps: Vec<String>,
    },
    /// A rollback left some steps in place; stock needs manual reconciliation.
    SagaCompensationIncomplete {
        saga_id: AggregateId,
        saga_type: String,
        error: String,
        failures: Vec<CompensationFailure>,
    },
}

impl DomainEvent for InventorySagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventorySagaEvent::InventoryReservedForOrder { .. } => "InventoryReservedForOrder",
            InventorySagaEvent::InventoryReservationFailed { .. } => "InventoryReservationFailed",
            InventorySagaEvent::StockTransferred { .. } => "StockTransferred",
            InventorySagaEvent::StockTransferFailed { .. } => "StockTransferFailed",
            InventorySagaEvent::ChannelAllocationsCompleted { .. } => {
                "ChannelAllocationsCompleted"
            }
            InventorySagaEvent::ChannelAllocationsFailed { .. } => "ChannelAllocationsFailed",
            InventorySagaEvent::RebalanceApplied { .. } => "RebalanceApplied",
            InventorySagaEvent::RebalanceFailed { .. } => "RebalanceFailed",
            InventorySagaEvent::InventoryFulfilled { .. } => "InventoryFulfilled",
            InventorySagaEvent::InventoryFulfillmentFailed { .. } => "InventoryFulfillmentFailed",
            InventorySagaEvent::SagaCompensationIncomplete { .. } => "SagaCompensationIncomplete",
        }
    }
}
