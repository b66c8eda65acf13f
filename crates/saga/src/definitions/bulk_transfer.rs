use common::ProductId;
use serde::{Deserialize, Serialize};

use super::{
    InventoryAction, InventoryCompensation, InventorySagaEvent, InventorySagaResult, InventoryStep,
    SagaContext,
};
use crate::error::{Result, SagaError};

/// Moves `quantity` on-hand units from one stock record to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransfer {
    pub source: ProductId,
    pub destination: ProductId,
    pub quantity: u32,
}

impl StockTransfer {
    pub fn new(source: impl Into<ProductId>, destination: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            quantity,
        }
    }
}

/// Applies a batch of stock transfers as one unit.
pub struct BulkTransferSaga {
    ctx: SagaContext,
}

impl BulkTransferSaga {
    pub const SAGA_TYPE: &'static str = "BulkTransfer";

    pub fn new(ctx: SagaContext) -> Self {
        Self { ctx }
    }

    /// Two steps per transfer. Each restores the quantity it saw before
    /// changing it.
    pub fn steps(transfers: &[StockTransfer]) -> Vec<InventoryStep> {
        transfers
            .iter()
            .flat_map(|t| {
                let quantity = i64::from(t.quantity);
                [
                    InventoryStep::new(
                        format!("Remove {} units from {}", t.quantity, t.source),
                        InventoryAction::AdjustStock {
                            product_id: t.source.clone(),
                            delta: -quantity,
                        },
                    )
                    .with_compensation(InventoryCompensation::RestoreStock {
                        product_id: t.source.clone(),
                    }),
                    InventoryStep::new(
                        format!("Add {} units to {}", t.quantity, t.destination),
                        InventoryAction::AdjustStock {
                            product_id: t.destination.clone(),
                            delta: quantity,
                        },
                    )
                    .with_compensation(InventoryCompensation::RestoreStock {
                        product_id: t.destination.clone(),
                    }),
                ]
            })
            .collect()
    }

    #[tracing::instrument(skip(self, transfers), fields(transfers = transfers.len()))]
    pub async fn run(&self, transfers: &[StockTransfer]) -> Result<InventorySagaResult> {
        if transfers.is_empty() {
            return Err(SagaError::Validation("no transfers given".to_string()));
        }
        if let Some(t) = transfers.iter().find(|t| t.quantity == 0) {
            return Err(SagaError::Validation(format!(
                "zero-quantity transfer from {} to {}",
                t.source, t.destination
            )));
        }
        if let Some(t) = transfers.iter().find(|t| t.source == t.destination) {
            return Err(SagaError::Validation(format!(
                "transfer source and destination are both {}",
                t.source
            )));
        }

        let steps = Self::steps(transfers);
        let result = self.ctx.execute(Self::SAGA_TYPE, &steps, None).await;

        let event = if result.success {
            InventorySagaEvent::StockTransferred {
                saga_id: result.saga_id,
                transfers: transfers.to_vec(),
            }
        } else {
            InventorySagaEvent::StockTransferFailed {
                saga_id: result.saga_id,
                error: result.error_message().unwrap_or_default(),
                compensated_steps: result.compensated_steps.clone(),
            }
        };
        self.ctx
            .publish(&result.saga_id.to_string(), "Saga", &event)
            .await;

        Ok(result)
    }
}
