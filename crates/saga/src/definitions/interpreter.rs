use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, ChannelId, ProductId};
use inventory::{AllocationEngine, StockLedger};
use serde::{Deserialize, Serialize};

use super::OrderLine;
use crate::error::SagaError;
use crate::executor::StepInterpreter;

/// Forward actions over the ledger and the allocation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InventoryAction {
    /// Reserve stock against a reference (an order id).
    ReserveStock {
        product_id: ProductId,
        quantity: u32,
        reference_id: String,
    },
    /// Add `delta` (which may be negative) to the on-hand quantity.
    AdjustStock { product_id: ProductId, delta: i64 },
    /// Allocate stock to a channel through the allocation engine.
    AllocateChannel {
        product_id: ProductId,
        channel_id: ChannelId,
        quantity: u32,
        priority: i32,
    },
    /// Set a channel's allocated quantity.
    SetChannelTarget {
        product_id: ProductId,
        channel_id: ChannelId,
        target: u32,
    },
    /// Check that the reservations held by `reference_id` cover every line.
    ValidateReservations {
        reference_id: String,
        lines: Vec<OrderLine>,
    },
    /// Turn reserved units into a shipped deduction.
    ShipReserved {
        product_id: ProductId,
        quantity: u32,
        reference_id: String,
    },
}

/// Compensations. Values not known until the action runs are read from its
/// [`StepOutput`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InventoryCompensation {
    ReleaseStock {
        product_id: ProductId,
        quantity: u32,
        reference_id: String,
    },
    /// Put back the on-hand quantity captured by `AdjustStock`.
    RestoreStock { product_id: ProductId },
    /// Release what `AllocateChannel` actually allocated.
    ReleaseAllocation {
        product_id: ProductId,
        channel_id: ChannelId,
    },
    /// Put back the target replaced by `SetChannelTarget`.
    RestoreChannelTarget {
        product_id: ProductId,
        channel_id: ChannelId,
    },
    /// Restore the on-hand quantity and the reservation consumed by
    /// `ShipReserved`.
    RestoreShipment {
        product_id: ProductId,
        quantity: u32,
        reference_id: String,
    },
}

/// What an action produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutput {
    Reserved {
        product_id: ProductId,
        quantity: u32,
        reference_id: String,
    },
    StockAdjusted {
        product_id: ProductId,
        previous: u32,
        current: u32,
    },
    Allocated {
        allocation_id: AggregateId,
        product_id: ProductId,
        channel_id: ChannelId,
        quantity: u32,
    },
    TargetApplied {
        product_id: ProductId,
        channel_id: ChannelId,
        previous: u32,
        target: u32,
    },
    Validated { lines: usize },
    Shipped {
        product_id: ProductId,
        quantity: u32,
        previous_quantity: u32,
        current_quantity: u32,
    },
}

/// Runs [`InventoryAction`]s against the stock ledger and allocation engine.
///
/// Read-then-write ledger actions hold the engine's per-product lock so they
/// serialize with allocation requests for the same product.
pub struct InventoryStepInterpreter {
    engine: Arc<AllocationEngine>,
}

impl InventoryStepInterpreter {
    pub fn new(engine: Arc<AllocationEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<AllocationEngine> {
        &self.engine
    }

    fn ledger(&self) -> &Arc<dyn StockLedger> {
        self.engine.ledger()
    }

    async fn adjust_stock(&self, product_id: &ProductId, delta: i64) -> Result<StepOutput, SagaError> {
        let _guard = self.engine.lock_product(product_id).await;
        let level = self.ledger().get_stock(product_id).await?;
        let current = i64::from(level.quantity) + delta;
        if current < 0 {
            return Err(SagaError::InsufficientStock {
                product_id: product_id.clone(),
                requested: u32::try_from(delta.unsigned_abs()).unwrap_or(u32::MAX),
            });
        }
        let current = u32::try_from(current).map_err(|_| {
            SagaError::Validation(format!("quantity for {product_id} would overflow"))
        })?;

        self.ledger().update_stock(product_id, current).await?;
        Ok(StepOutput::StockAdjusted {
            product_id: product_id.clone(),
            previous: level.quantity,
            current,
        })
    }

    async fn validate_reservations(
        &self,
        reference_id: &str,
        lines: &[OrderLine],
    ) -> Result<StepOutput, SagaError> {
        let mut required: BTreeMap<&ProductId, u32> = BTreeMap::new();
        for line in lines {
            *required.entry(&line.product_id).or_insert(0) += line.quantity;
        }

        for (product_id, quantity) in required {
            self.ensure_held(product_id, quantity, reference_id).await?;
        }
        Ok(StepOutput::Validated { lines: lines.len() })
    }

    /// Fails unless `reference_id` holds at least `quantity` of the product.
    async fn ensure_held(
        &self,
        product_id: &ProductId,
        quantity: u32,
        reference_id: &str,
    ) -> Result<(), SagaError> {
        let held = self.ledger().reserved_for(product_id, reference_id).await?;
        if held < quantity {
            return Err(SagaError::Validation(format!(
                "{product_id}: {quantity} to fulfil but {reference_id} holds {held}"
            )));
        }
        Ok(())
    }

    async fn ship_reserved(
        &self,
        product_id: &ProductId,
        quantity: u32,
        reference_id: &str,
    ) -> Result<StepOutput, SagaError> {
        let _guard = self.engine.lock_product(product_id).await;
        self.ensure_held(product_id, quantity, reference_id).await?;
        let level = self.ledger().get_stock(product_id).await?;
        let remaining = level.quantity.checked_sub(quantity).ok_or_else(|| {
            SagaError::InsufficientStock {
                product_id: product_id.clone(),
                requested: quantity,
            }
        })?;

        self.ledger()
            .release_stock(product_id, quantity, reference_id)
            .await?;
        if let Err(e) = self.ledger().update_stock(product_id, remaining).await {
            // Put the reservation back so the step leaves nothing behind.
            if let Err(undo) = self
                .ledger()
                .reserve_stock(product_id, quantity, reference_id)
                .await
            {
                tracing::error!(%product_id, quantity, reference_id, error = %undo, "failed to restore reservation after shipment error");
            }
            return Err(e.into());
        }

        Ok(StepOutput::Shipped {
            product_id: product_id.clone(),
            quantity,
            previous_quantity: level.quantity,
            current_quantity: remaining,
        })
    }
}

#[async_trait]
impl StepInterpreter for InventoryStepInterpreter {
    type Action = InventoryAction;
    type Compensation = InventoryCompensation;
    type Output = StepOutput;

    async fn perform(&self, action: &InventoryAction) -> Result<StepOutput, SagaError> {
        match action {
            InventoryAction::ReserveStock {
                product_id,
                quantity,
                reference_id,
            } => {
                self.ledger()
                    .reserve_stock(product_id, *quantity, reference_id)
                    .await?;
                Ok(StepOutput::Reserved {
                    product_id: product_id.clone(),
                    quantity: *quantity,
                    reference_id: reference_id.clone(),
                })
            }
            InventoryAction::AdjustStock { product_id, delta } => {
                self.adjust_stock(product_id, *delta).await
            }
            InventoryAction::AllocateChannel {
                product_id,
                channel_id,
                quantity,
                priority,
            } => {
                let result = self
                    .engine
                    .allocate_inventory(product_id, channel_id, *quantity, *priority)
                    .await?;
                if !result.is_allocated() {
                    return Err(SagaError::InsufficientStock {
                        product_id: product_id.clone(),
                        requested: *quantity,
                    });
                }
                Ok(StepOutput::Allocated {
                    allocation_id: result.allocation_id,
                    product_id: product_id.clone(),
                    channel_id: channel_id.clone(),
                    quantity: result.quantity,
                })
            }
            InventoryAction::SetChannelTarget {
                product_id,
                channel_id,
                target,
            } => {
                let previous = self
                    .engine
                    .apply_target(product_id, channel_id, *target)
                    .await?;
                Ok(StepOutput::TargetApplied {
                    product_id: product_id.clone(),
                    channel_id: channel_id.clone(),
                    previous,
                    target: *target,
                })
            }
            InventoryAction::ValidateReservations {
                reference_id,
                lines,
            } => self.validate_reservations(reference_id, lines).await,
            InventoryAction::ShipReserved {
                product_id,
                quantity,
                reference_id,
            } => self.ship_reserved(product_id, *quantity, reference_id).await,
        }
    }

    async fn compensate(
        &self,
        compensation: &InventoryCompensation,
        output: &StepOutput,
    ) -> Result<(), SagaError> {
        match (compensation, output) {
            (
                InventoryCompensation::ReleaseStock {
                    product_id,
                    quantity,
                    reference_id,
                },
                _,
            ) => {
                self.ledger()
                    .release_stock(product_id, *quantity, reference_id)
                    .await?;
            }
            (
                InventoryCompensation::RestoreStock { product_id },
                StepOutput::StockAdjusted { previous, .. },
            ) => {
                let _guard = self.engine.lock_product(product_id).await;
                self.ledger().update_stock(product_id, *previous).await?;
            }
            (
                InventoryCompensation::ReleaseAllocation {
                    product_id,
                    channel_id,
                },
                StepOutput::Allocated {
                    allocation_id,
                    quantity,
                    ..
                },
            ) => {
                self.engine
                    .release_allocation(*allocation_id, channel_id, product_id, *quantity)
                    .await?;
            }
            (
                InventoryCompensation::RestoreChannelTarget {
                    product_id,
                    channel_id,
                },
                StepOutput::TargetApplied { previous, .. },
            ) => {
                self.engine
                    .apply_target(product_id, channel_id, *previous)
                    .await?;
            }
            (
                InventoryCompensation::RestoreShipment {
                    product_id,
                    quantity,
                    reference_id,
                },
                StepOutput::Shipped {
                    previous_quantity, ..
                },
            ) => {
                let _guard = self.engine.lock_product(product_id).await;
                self.ledger()
                    .update_stock(product_id, *previous_quantity)
                    .await?;
                self.ledger()
                    .reserve_stock(product_id, *quantity, reference_id)
                    .await?;
            }
            (compensation, output) => {
                return Err(SagaError::CompensationMismatch(format!(
                    "{compensation:?} cannot undo {output:?}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::InMemoryEventTransport;
    use inventory::InMemoryStockLedger;

    fn interpreter() -> (InMemoryStockLedger, InventoryStepInterpreter) {
        let ledger = InMemoryStockLedger::new();
        let engine = AllocationEngine::new(
            Arc::new(ledger.clone()),
            Arc::new(InMemoryEventTransport::new()),
        );
        (ledger, InventoryStepInterpreter::new(Arc::new(engine)))
    }

    fn sku() -> ProductId {
        ProductId::new("SKU-001")
    }

    #[tokio::test]
    async fn test_adjust_and_restore_stock() {
        let (ledger, interpreter) = interpreter();
        ledger.set_stock("SKU-001", 10);

        let output = interpreter
            .perform(&InventoryAction::AdjustStock {
                product_id: sku(),
                delta: -4,
            })
            .await
            .unwrap();
        assert_eq!(ledger.snapshot(&sku()).quantity, 6);

        interpreter
            .compensate(&InventoryCompensation::RestoreStock { product_id: sku() }, &output)
            .await
            .unwrap();
        assert_eq!(ledger.snapshot(&sku()).quantity, 10);
    }

    #[tokio::test]
    async fn test_adjust_below_zero_fails() {
        let (ledger, interpreter) = interpreter();
        ledger.set_stock("SKU-001", 3);

        let err = interpreter
            .perform(&InventoryAction::AdjustStock {
                product_id: sku(),
                delta: -4,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::InsufficientStock { requested: 4, .. }));
        assert_eq!(ledger.snapshot(&sku()).quantity, 3);
    }

    #[tokio::test]
    async fn test_ship_and_restore_shipment() {
        let (ledger, interpreter) = interpreter();
        ledger.set_stock("SKU-001", 10);
        ledger.reserve_stock(&sku(), 4, "ORD-1").await.unwrap();

        let output = interpreter
            .perform(&InventoryAction::ShipReserved {
                product_id: sku(),
                quantity: 4,
                reference_id: "ORD-1".to_string(),
            })
            .await
            .unwrap();
        let level = ledger.snapshot(&sku());
        assert_eq!((level.quantity, level.reserved), (6, 0));

        interpreter
            .compensate(
                &InventoryCompensation::RestoreShipment {
                    product_id: sku(),
                    quantity: 4,
                    reference_id: "ORD-1".to_string(),
                },
                &output,
            )
            .await
            .unwrap();
        let level = ledger.snapshot(&sku());
        assert_eq!((level.quantity, level.reserved), (10, 4));
        assert_eq!(ledger.reserved_by(&sku(), "ORD-1"), 4);
    }

    #[tokio::test]
    async fn test_validate_reservations_sums_lines() {
        let (ledger, interpreter) = interpreter();
        ledger.set_stock("SKU-001", 10);
        ledger.reserve_stock(&sku(), 3, "ORD-1").await.unwrap();

        let validate = |lines: Vec<OrderLine>| InventoryAction::ValidateReservations {
            reference_id: "ORD-1".to_string(),
            lines,
        };

        let err = interpreter
            .perform(&validate(vec![
                OrderLine::new("SKU-001", 2),
                OrderLine::new("SKU-001", 2),
            ]))
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::Validation(_)));

        let output = interpreter
            .perform(&validate(vec![OrderLine::new("SKU-001", 3)]))
            .await
            .unwrap();
        assert_eq!(output, StepOutput::Validated { lines: 1 });
    }

    #[tokio::test]
    async fn test_other_references_do_not_cover_an_order() {
        let (ledger, interpreter) = interpreter();
        ledger.set_stock("SKU-001", 10);
        ledger.reserve_stock(&sku(), 5, "ORD-A").await.unwrap();

        let err = interpreter
            .perform(&InventoryAction::ValidateReservations {
                reference_id: "ORD-B".to_string(),
                lines: vec![OrderLine::new("SKU-001", 5)],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::Validation(_)));

        let err = interpreter
            .perform(&InventoryAction::ShipReserved {
                product_id: sku(),
                quantity: 5,
                reference_id: "ORD-B".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::Validation(_)));

        let level = ledger.snapshot(&sku());
        assert_eq!((level.quantity, level.reserved), (10, 5));
        assert_eq!(ledger.reserved_by(&sku(), "ORD-A"), 5);
    }

    #[tokio::test]
    async fn test_allocate_channel_reports_insufficient_stock() {
        let (ledger, interpreter) = interpreter();
        ledger.set_stock("SKU-001", 1);

        let err = interpreter
            .perform(&InventoryAction::AllocateChannel {
                product_id: sku(),
                channel_id: ChannelId::new("ebay"),
                quantity: 2,
                priority: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::InsufficientStock { requested: 2, .. }));
    }

    #[tokio::test]
    async fn test_mismatched_compensation_is_rejected() {
        let (_ledger, interpreter) = interpreter();
        let err = interpreter
            .compensate(
                &InventoryCompensation::RestoreStock { product_id: sku() },
                &StepOutput::Validated { lines: 1 },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::CompensationMismatch(_)));
    }

    #[test]
    fn test_step_data_is_serializable() {
        let action = InventoryAction::SetChannelTarget {
            product_id: sku(),
            channel_id: ChannelId::new("amazon"),
            target: 12,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["kind"], "set_channel_target");
        assert_eq!(json["target"], 12);
    }
}
