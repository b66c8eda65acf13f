//! Inventory core for multi-channel selling.
//!
//! This crate provides:
//! - the [`StockLedger`] contract, the single owner of on-hand and reserved
//!   quantity per product, with an in-memory implementation
//! - the [`AllocationEngine`], which tracks each channel's claim on shared
//!   stock and serializes all mutations per product
//! - the [`ConflictResolver`], a set of deterministic strategies for
//!   reconciling quantities reported by different channels

pub mod allocation;
pub mod conflict;
pub mod error;
pub mod ledger;

pub use allocation::{
    AGGREGATE_TYPE, AllocationEngine, AllocationEntry, AllocationEvent, AllocationResult,
    AllocationStatus, AllocationSummary, ChannelAllocation, ChannelLimits, ChannelTarget,
    EntryState, INSUFFICIENT_STOCK, RebalanceOutcome, RebalancePolicy, compute_targets,
};
pub use conflict::{
    ConflictConfig, ConflictDetection, ConflictReport, ConflictResolver, ConflictType,
    QuantityReport, Resolution, ResolutionStrategy,
};
pub use error::{AllocationError, ConflictError, LedgerError, Result};
pub use ledger::{InMemoryStockLedger, StockLedger, StockLevel};
