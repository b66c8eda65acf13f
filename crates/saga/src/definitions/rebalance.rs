use common::ProductId;
use inventory::ChannelTarget;

use super::{
    InventoryAction, InventoryCompensation, InventorySagaEvent, InventorySagaResult, InventoryStep,
    SagaContext,
};
use crate::error::Result;

/// Applies a rebalance plan one channel at a time, restoring earlier
/// channels if a later one fails.
pub struct RebalanceSaga {
    ctx: SagaContext,
}

impl RebalanceSaga {
    pub const SAGA_TYPE: &'static str = "Rebalance";

    pub fn new(ctx: SagaContext) -> Self {
        Self { ctx }
    }

    /// One step per channel whose quantity changes.
    pub fn steps(product_id: &ProductId, targets: &[ChannelTarget]) -> Vec<InventoryStep> {
        targets
            .iter()
            .filter(|t| t.is_change())
            .map(|t| {
                InventoryStep::new(
                    format!("Set {} allocation to {}", t.channel_id, t.target),
                    InventoryAction::SetChannelTarget {
                        product_id: product_id.clone(),
                        channel_id: t.channel_id.clone(),
                        target: t.target,
                    },
                )
                .with_compensation(InventoryCompensation::RestoreChannelTarget {
                    product_id: product_id.clone(),
                    channel_id: t.channel_id.clone(),
                })
            })
            .collect()
    }

    /// Plans a rebalance with the engine's policy and applies it.
    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    pub async fn run(&self, product_id: &ProductId) -> Result<InventorySagaResult> {
        let plan = self.ctx.engine().plan_rebalance(product_id).await?;
        let steps = Self::steps(product_id, &plan.targets);
        let result = self.ctx.execute(Self::SAGA_TYPE, &steps, None).await;

        let event = if result.success {
            InventorySagaEvent::RebalanceApplied {
                product_id: product_id.clone(),
                targets: plan.targets.into_iter().filter(ChannelTarget::is_change).collect(),
            }
        } else {
            InventorySagaEvent::RebalanceFailed {
                product_id: product_id.clone(),
                error: result.error_message().unwrap_or_default(),
                compensated_steps: result.compensated_steps.clone(),
            }
        };
        self.ctx
            .publish(product_id.as_str(), inventory::AGGREGATE_TYPE, &event)
            .await;

        Ok(result)
    }
}
