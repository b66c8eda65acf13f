//! Saga error types.

use common::ProductId;
use event_bus::EventBusError;
use inventory::{AllocationError, LedgerError};
use thiserror::Error;

/// Errors that can occur while running a saga.
///
/// Step failures are captured in a [`SagaResult`](crate::SagaResult) rather
/// than returned to the caller.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A saga step failed.
    #[error("Saga step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    /// A step did not finish within the configured timeout.
    #[error("Saga step '{step}' timed out after {timeout_ms}ms")]
    StepTimedOut { step: String, timeout_ms: u64 },

    /// The saga was cancelled while the step was pending.
    #[error("Saga cancelled at step '{step}'")]
    Cancelled { step: String },

    /// Stock was not available for an allocation step.
    #[error("Insufficient stock for {product_id}: requested {requested}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
    },

    /// Input was rejected before the saga started.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A compensation was paired with an output it cannot undo.
    #[error("Compensation does not match step output: {0}")]
    CompensationMismatch(String),

    /// Stock ledger error.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Allocation engine error.
    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationError),

    /// Event transport error.
    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
