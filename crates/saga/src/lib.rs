//! Saga pattern for multi-step inventory operations.
//!
//! A saga is a list of [`SagaStep`]s, each a forward action with an optional
//! compensation. [`SagaExecutor`] runs the steps in order through a
//! [`StepInterpreter`]; when a step fails, the completed steps are compensated
//! in reverse order.
//!
//! The [`definitions`] module holds the inventory sagas: order reservation,
//! bulk transfer, multi-channel allocation, rebalance and fulfillment.

pub mod coordinator;
pub mod definitions;
pub mod error;
pub mod events;
pub mod executor;
pub mod state;

pub use coordinator::{ORDER_CREATED, SagaCoordinator};
pub use definitions::{
    BulkTransferSaga, ChannelRequest, FulfillmentSaga, InventoryAction, InventoryCompensation,
    InventorySagaEvent, InventorySagaResult, InventoryStep, InventoryStepInterpreter,
    MultiChannelAllocationSaga, Order, OrderLine, OrderReservationSaga, RebalanceSaga,
    SagaContext, StepOutput, StockTransfer,
};
pub use error::{Result, SagaError};
pub use events::SagaEvent;
pub use executor::{
    CompensationFailure, ExecutorConfig, SagaExecutor, SagaResult, SagaStep, StepInterpreter,
};
pub use state::SagaState;
