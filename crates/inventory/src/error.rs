//! Inventory error types.

use common::{AggregateId, ChannelId, ProductId};
use thiserror::Error;

use crate::allocation::EntryState;

/// Errors raised by a [`StockLedger`](crate::StockLedger).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Not enough unreserved stock to satisfy a reservation.
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// A new on-hand quantity would drop below what is already reserved.
    #[error("Quantity {quantity} for {product_id} is below reserved {reserved}")]
    BelowReserved {
        product_id: ProductId,
        quantity: u32,
        reserved: u32,
    },

    /// The ledger could not be reached.
    #[error("Stock ledger unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the [`AllocationEngine`](crate::AllocationEngine).
///
/// Insufficient stock is not one of them: it is reported through
/// [`AllocationStatus::Failed`](crate::AllocationStatus::Failed).
#[derive(Debug, Error)]
pub enum AllocationError {
    /// The stock ledger failed.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Quantity must be greater than zero.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// No allocation was recorded under this id.
    #[error("Allocation not found: {0}")]
    AllocationNotFound(AggregateId),

    /// No allocation record exists for the channel/product pair.
    #[error("No allocation for channel {channel_id} and product {product_id}")]
    ChannelAllocationNotFound {
        channel_id: ChannelId,
        product_id: ProductId,
    },

    /// The allocation belongs to a different channel or product.
    #[error("Allocation {allocation_id} does not belong to channel {channel_id} and product {product_id}")]
    AllocationMismatch {
        allocation_id: AggregateId,
        channel_id: ChannelId,
        product_id: ProductId,
    },

    /// The allocation is not in a state that allows the operation.
    #[error("Cannot {action} allocation {allocation_id} in {state} state")]
    InvalidAllocationState {
        allocation_id: AggregateId,
        state: EntryState,
        action: &'static str,
    },

    /// Minimum level is above maximum level.
    #[error("Invalid channel limits: min {min_level} exceeds max {max_level}")]
    InvalidLimits { min_level: u32, max_level: u32 },
}

/// Errors raised by the [`ConflictResolver`](crate::ConflictResolver).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConflictError {
    /// The report carries no quantities.
    #[error("Conflict report for {0} has no channel reports")]
    EmptyReport(ProductId),

    /// The strategy name is not recognised.
    #[error("Unknown resolution strategy: {0}")]
    UnknownStrategy(String),
}

/// Result type for allocation operations.
pub type Result<T> = std::result::Result<T, AllocationError>;
