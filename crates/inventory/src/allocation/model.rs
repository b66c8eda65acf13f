//! Allocation records and operation results.

use chrono::{DateTime, Utc};
use common::{AggregateId, ChannelId, ProductId};
use serde::{Deserialize, Serialize};

use super::RebalancePolicy;

/// Reason reported when an allocation cannot be covered by available stock.
pub const INSUFFICIENT_STOCK: &str = "Insufficient stock";

/// A channel's claim on one product's stock.
///
/// Records are created on first use and never removed; a channel that no
/// longer sells a product keeps a zeroed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAllocation {
    pub channel_id: ChannelId,
    pub product_id: ProductId,
    /// Units firmly allocated to the channel.
    pub allocated_quantity: u32,
    /// Units tentatively reserved for the channel.
    pub reserved_quantity: u32,
    /// Higher wins during rebalance.
    pub priority: i32,
    pub min_level: u32,
    pub max_level: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

impl ChannelAllocation {
    /// Creates an empty record.
    pub fn new(channel_id: ChannelId, product_id: ProductId) -> Self {
        Self {
            channel_id,
            product_id,
            allocated_quantity: 0,
            reserved_quantity: 0,
            priority: 0,
            min_level: 0,
            max_level: None,
            updated_at: Utc::now(),
        }
    }

    /// Reserved plus allocated units.
    pub fn total(&self) -> u32 {
        self.allocated_quantity
            .saturating_add(self.reserved_quantity)
    }
}

/// Rebalance bounds for one channel/product pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelLimits {
    pub priority: i32,
    pub min_level: u32,
    pub max_level: Option<u32>,
}

impl ChannelLimits {
    /// Limits with the given priority and no bounds.
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    /// Sets the minimum level.
    pub fn min(mut self, min_level: u32) -> Self {
        self.min_level = min_level;
        self
    }

    /// Sets the maximum level.
    pub fn max(mut self, max_level: u32) -> Self {
        self.max_level = Some(max_level);
        self
    }
}

/// Lifecycle state of a single admitted allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Reserved,
    Confirmed,
    Released,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Reserved => "reserved",
            EntryState::Confirmed => "confirmed",
            EntryState::Released => "released",
        }
    }
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audit record of one admitted allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub allocation_id: AggregateId,
    pub channel_id: ChannelId,
    pub product_id: ProductId,
    /// Units still held by this allocation.
    pub quantity: u32,
    pub state: EntryState,
    pub created_at: DateTime<Utc>,
}

/// Outcome status of an allocation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AllocationStatus {
    Allocated,
    Failed { reason: String },
}

/// Result of [`AllocationEngine::allocate_inventory`](super::AllocationEngine::allocate_inventory).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub allocation_id: AggregateId,
    pub product_id: ProductId,
    pub channel_id: ChannelId,
    pub quantity: u32,
    #[serde(flatten)]
    pub status: AllocationStatus,
}

impl AllocationResult {
    pub(crate) fn allocated(
        allocation_id: AggregateId,
        product_id: ProductId,
        channel_id: ChannelId,
        quantity: u32,
    ) -> Self {
        Self {
            allocation_id,
            product_id,
            channel_id,
            quantity,
            status: AllocationStatus::Allocated,
        }
    }

    pub(crate) fn insufficient(
        allocation_id: AggregateId,
        product_id: ProductId,
        channel_id: ChannelId,
        quantity: u32,
    ) -> Self {
        Self {
            allocation_id,
            product_id,
            channel_id,
            quantity,
            status: AllocationStatus::Failed {
                reason: INSUFFICIENT_STOCK.to_string(),
            },
        }
    }

    /// Returns true if the allocation was admitted.
    pub fn is_allocated(&self) -> bool {
        matches!(self.status, AllocationStatus::Allocated)
    }

    /// Returns the failure reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match &self.status {
            AllocationStatus::Allocated => None,
            AllocationStatus::Failed { reason } => Some(reason),
        }
    }
}

/// A channel's allocated quantity before and after a redistribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTarget {
    pub channel_id: ChannelId,
    pub previous: u32,
    pub target: u32,
}

impl ChannelTarget {
    /// Returns true if the target differs from the current quantity.
    pub fn is_change(&self) -> bool {
        self.previous != self.target
    }
}

/// Result of a rebalance (or a rebalance plan).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceOutcome {
    pub product_id: ProductId,
    pub available: u32,
    pub policy: RebalancePolicy,
    /// Targets in descending priority order.
    pub targets: Vec<ChannelTarget>,
}

/// Aggregated view of one product's allocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSummary {
    pub product_id: ProductId,
    pub synced: bool,
    pub channels: Vec<ChannelAllocation>,
    pub total_allocated: u32,
}
