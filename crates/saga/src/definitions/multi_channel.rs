use common::{ChannelId, ProductId};
use serde::{Deserialize, Serialize};

use super::{
    InventoryAction, InventoryCompensation, InventorySagaEvent, InventorySagaResult, InventoryStep,
    SagaContext, StepOutput,
};
use crate::error::{Result, SagaError};

/// Quantity a channel asks for, with its priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRequest {
    pub channel_id: ChannelId,
    pub quantity: u32,
    pub priority: i32,
}

impl ChannelRequest {
    pub fn new(channel_id: impl Into<ChannelId>, quantity: u32, priority: i32) -> Self {
        Self {
            channel_id: channel_id.into(),
            quantity,
            priority,
        }
    }
}

/// Allocates one product to several channels, all or nothing.
pub struct MultiChannelAllocationSaga {
    ctx: SagaContext,
}

impl MultiChannelAllocationSaga {
    pub const SAGA_TYPE: &'static str = "MultiChannelAllocation";

    pub fn new(ctx: SagaContext) -> Self {
        Self { ctx }
    }

    /// One step per request, highest priority first. Equal priorities keep
    /// their input order.
    pub fn steps(product_id: &ProductId, requests: &[ChannelRequest]) -> Vec<InventoryStep> {
        let mut sorted: Vec<&ChannelRequest> = requests.iter().collect();
        sorted.sort_by(|a, b| b.priority.cmp(&a.priority));

        sorted
            .into_iter()
            .map(|r| {
                InventoryStep::new(
                    format!("Allocate {} units to {}", r.quantity, r.channel_id),
                    InventoryAction::AllocateChannel {
                        product_id: product_id.clone(),
                        channel_id: r.channel_id.clone(),
                        quantity: r.quantity,
                        priority: r.priority,
                    },
                )
                .with_compensation(InventoryCompensation::ReleaseAllocation {
                    product_id: product_id.clone(),
                    channel_id: r.channel_id.clone(),
                })
            })
            .collect()
    }

    #[tracing::instrument(skip(self, requests), fields(product_id = %product_id, channels = requests.len()))]
    pub async fn run(
        &self,
        product_id: &ProductId,
        requests: &[ChannelRequest],
    ) -> Result<InventorySagaResult> {
        if requests.is_empty() {
            return Err(SagaError::Validation(format!(
                "no channel requests for {product_id}"
            )));
        }
        if let Some(r) = requests.iter().find(|r| r.quantity == 0) {
            return Err(SagaError::Validation(format!(
                "zero quantity requested by {}",
                r.channel_id
            )));
        }

        let steps = Self::steps(product_id, requests);
        let result = self.ctx.execute(Self::SAGA_TYPE, &steps, None).await;

        let event = if result.success {
            let allocations = result
                .results
                .iter()
                .filter_map(|output| match output {
                    StepOutput::Allocated {
                        channel_id,
                        quantity,
                        ..
                    } => Some((channel_id.clone(), *quantity)),
                    _ => None,
                })
                .collect();
            InventorySagaEvent::ChannelAllocationsCompleted {
                product_id: product_id.clone(),
                allocations,
            }
        } else {
            InventorySagaEvent::ChannelAllocationsFailed {
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
