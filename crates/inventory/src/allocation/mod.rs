//! Per-channel allocation of shared stock.

mod engine;
mod events;
mod model;
mod rebalance;

pub use engine::AllocationEngine;
pub use events::{AGGREGATE_TYPE, AllocationEvent};
pub use model::{
    AllocationEntry, AllocationResult, AllocationStatus, AllocationSummary, ChannelAllocation,
    ChannelLimits, ChannelTarget, EntryState, INSUFFICIENT_STOCK, RebalanceOutcome,
};
pub use rebalance::{RebalancePolicy, compute_targets};
