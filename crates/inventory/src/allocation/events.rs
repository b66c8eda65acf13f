//! Allocation domain events.

use common::{AggregateId, ChannelId, ProductId};
use event_bus::DomainEvent;
use serde::{Deserialize, Serialize};

use super::ChannelTarget;

/// Aggregate type used for every allocation event. The aggregate id is the
/// product id.
pub const AGGREGATE_TYPE: &str = "Product";

/// Events published by the allocation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AllocationEvent {
    /// Stock was reserved for a channel.
    InventoryAllocated {
        allocation_id: AggregateId,
        product_id: ProductId,
        channel_id: ChannelId,
        quantity: u32,
        priority: i32,
    },

    /// A reservation became a firm allocation.
    AllocationConfirmed {
        allocation_id: AggregateId,
        product_id: ProductId,
        channel_id: ChannelId,
        quantity: u32,
    },

    /// Allocated or reserved units were returned to the pool.
    AllocationReleased {
        allocation_id: AggregateId,
        product_id: ProductId,
        channel_id: ChannelId,
        quantity: u32,
    },

    /// Available stock was redistributed across channels.
    AllocationsRebalanced {
        product_id: ProductId,
        available: u32,
        targets: Vec<ChannelTarget>,
    },

    /// Channel allocations were aggregated for a sync.
    AllocationsSynced {
        product_id: ProductId,
        channels: Vec<ChannelId>,
        total_allocated: u32,
    },

    /// A channel's allocated quantity was set directly.
    AllocationAdjusted {
        product_id: ProductId,
        channel_id: ChannelId,
        previous: u32,
        quantity: u32,
    },
}

impl AllocationEvent {
    /// Returns the product this event belongs to.
    pub fn product_id(&self) -> &ProductId {
        match self {
            AllocationEvent::InventoryAllocated { product_id, .. }
            | AllocationEvent::AllocationConfirmed { product_id, .. }
            | AllocationEvent::AllocationReleased { product_id, .. }
            | AllocationEvent::AllocationsRebalanced { product_id, .. }
            | AllocationEvent::AllocationsSynced { product_id, .. }
            | AllocationEvent::AllocationAdjusted { product_id, .. } => product_id,
        }
    }
}

impl DomainEvent for AllocationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AllocationEvent::InventoryAllocated { .. } => "InventoryAllocated",
            AllocationEvent::AllocationConfirmed { .. } => "AllocationConfirmed",
            AllocationEvent::AllocationReleased { .. } => "AllocationReleased",
            AllocationEvent::AllocationsRebalanced { .. } => "AllocationsRebalanced",
            AllocationEvent::AllocationsSynced { .. } => "AllocationsSynced",
            AllocationEvent::AllocationAdjusted { .. } => "AllocationAdjusted",
        }
    }
}
