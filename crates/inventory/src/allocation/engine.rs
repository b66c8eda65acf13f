//! Allocation engine.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use common::{AggregateId, ChannelId, KeyedLocks, ProductId};
use event_bus::{DomainEvent, EventTransport, EventTransportExt};
use tokio::sync::OwnedMutexGuard;

use crate::error::{AllocationError, LedgerError, Result};
use crate::ledger::StockLedger;

use super::{
    AGGREGATE_TYPE, AllocationEntry, AllocationEvent, AllocationResult, AllocationSummary,
    ChannelAllocation, ChannelLimits, EntryState, RebalanceOutcome, RebalancePolicy,
    compute_targets,
};

#[derive(Debug, Default)]
struct AllocationTable {
    records: HashMap<(ProductId, ChannelId), ChannelAllocation>,
    entries: HashMap<AggregateId, AllocationEntry>,
}

impl AllocationTable {
    fn record_mut(&mut self, product_id: &ProductId, channel_id: &ChannelId) -> &mut ChannelAllocation {
        self.records
            .entry((product_id.clone(), channel_id.clone()))
            .or_insert_with(|| ChannelAllocation::new(channel_id.clone(), product_id.clone()))
    }

    fn for_product(&self, product_id: &ProductId) -> Vec<ChannelAllocation> {
        let mut records: Vec<_> = self
            .records
            .values()
            .filter(|r| &r.product_id == product_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.channel_id.cmp(&b.channel_id))
        });
        records
    }
}

/// Tracks each channel's reserved and allocated share of shared stock.
///
/// Every operation on a product holds that product's lock from the first
/// ledger read to the last record write, so concurrent requests for the
/// same product are applied one at a time in admission order. Different
/// products proceed in parallel.
pub struct AllocationEngine {
    ledger: Arc<dyn StockLedger>,
    transport: Arc<dyn EventTransport>,
    policy: RebalancePolicy,
    locks: KeyedLocks<ProductId>,
    table: RwLock<AllocationTable>,
}

impl AllocationEngine {
    /// Creates an engine with the even-split rebalance policy.
    pub fn new(ledger: Arc<dyn StockLedger>, transport: Arc<dyn EventTransport>) -> Self {
        Self {
            ledger,
            transport,
            policy: RebalancePolicy::default(),
            locks: KeyedLocks::new(),
            table: RwLock::new(AllocationTable::default()),
        }
    }

    /// Sets the rebalance policy.
    pub fn with_policy(mut self, policy: RebalancePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the rebalance policy.
    pub fn policy(&self) -> RebalancePolicy {
        self.policy
    }

    /// Returns the stock ledger.
    pub fn ledger(&self) -> &Arc<dyn StockLedger> {
        &self.ledger
    }

    /// Takes the product's lock for a read-modify-write against the ledger
    /// made outside the engine. Must not be held while calling the engine
    /// for the same product.
    pub async fn lock_product(&self, product_id: &ProductId) -> OwnedMutexGuard<()> {
        self.locks.lock(product_id).await
    }

    /// Reserves stock for a channel.
    ///
    /// Returns a `failed` result with reason `"Insufficient stock"` and
    /// changes nothing when the product's available stock is below
    /// `quantity`.
    #[tracing::instrument(skip(self), fields(product_id = %product_id, channel_id = %channel_id))]
    pub async fn allocate_inventory(
        &self,
        product_id: &ProductId,
        channel_id: &ChannelId,
        quantity: u32,
        priority: i32,
    ) -> Result<AllocationResult> {
        if quantity == 0 {
            return Err(AllocationError::InvalidQuantity { quantity });
        }
        metrics::counter!("allocation_requests_total").increment(1);

        let _guard = self.locks.lock(product_id).await;
        let allocation_id = AggregateId::new();

        let stock = self.ledger.get_stock(product_id).await?;
        if stock.available() < quantity {
            return Ok(self.reject(allocation_id, product_id, channel_id, quantity, stock.available()));
        }

        match self
            .ledger
            .reserve_stock(product_id, quantity, &allocation_id.to_string())
            .await
        {
            Ok(_) => {}
            Err(LedgerError::InsufficientStock { available, .. }) => {
                return Ok(self.reject(allocation_id, product_id, channel_id, quantity, available));
            }
            Err(e) => return Err(e.into()),
        }

        {
            let mut table = self.write();
            let record = table.record_mut(product_id, channel_id);
            record.reserved_quantity = record.reserved_quantity.saturating_add(quantity);
            record.priority = priority;
            record.updated_at = Utc::now();
            table.entries.insert(
                allocation_id,
                AllocationEntry {
                    allocation_id,
                    channel_id: channel_id.clone(),
                    product_id: product_id.clone(),
                    quantity,
                    state: EntryState::Reserved,
                    created_at: Utc::now(),
                },
            );
        }

        tracing::info!(%allocation_id, quantity, "inventory allocated");
        self.publish(AllocationEvent::InventoryAllocated {
            allocation_id,
            product_id: product_id.clone(),
            channel_id: channel_id.clone(),
            quantity,
            priority,
        })
        .await;

        Ok(AllocationResult::allocated(
            allocation_id,
            product_id.clone(),
            channel_id.clone(),
            quantity,
        ))
    }

    /// Turns a reservation into a firm allocation for the channel.
    #[tracing::instrument(skip(self), fields(product_id = %product_id, channel_id = %channel_id))]
    pub async fn confirm_allocation(
        &self,
        allocation_id: AggregateId,
        channel_id: &ChannelId,
        product_id: &ProductId,
    ) -> Result<ChannelAllocation> {
        let _guard = self.locks.lock(product_id).await;

        let (record, quantity) = {
            let mut guard = self.write();
            let table = &mut *guard;
            let entry = table
                .entries
                .get_mut(&allocation_id)
                .ok_or(AllocationError::AllocationNotFound(allocation_id))?;
            if &entry.channel_id != channel_id || &entry.product_id != product_id {
                return Err(AllocationError::AllocationMismatch {
                    allocation_id,
                    channel_id: channel_id.clone(),
                    product_id: product_id.clone(),
                });
            }
            if entry.state != EntryState::Reserved {
                return Err(AllocationError::InvalidAllocationState {
                    allocation_id,
                    state: entry.state,
                    action: "confirm",
                });
            }
            let record = table
                .records
                .get_mut(&(product_id.clone(), channel_id.clone()))
                .ok_or_else(|| AllocationError::ChannelAllocationNotFound {
                    channel_id: channel_id.clone(),
                    product_id: product_id.clone(),
                })?;

            entry.state = EntryState::Confirmed;
            record.reserved_quantity = record.reserved_quantity.saturating_sub(entry.quantity);
            record.allocated_quantity = record.allocated_quantity.saturating_add(entry.quantity);
            record.updated_at = Utc::now();
            (record.clone(), entry.quantity)
        };

        tracing::info!(%allocation_id, quantity, "allocation confirmed");
        self.publish(AllocationEvent::AllocationConfirmed {
            allocation_id,
            product_id: product_id.clone(),
            channel_id: channel_id.clone(),
            quantity,
        })
        .await;

        Ok(record)
    }

    /// Returns units to the shared pool.
    ///
    /// Releases `quantity` in the ledger, then decrements the channel's
    /// reserved quantity (or allocated quantity, for a confirmed
    /// allocation), floored at zero.
    #[tracing::instrument(skip(self), fields(product_id = %product_id, channel_id = %channel_id))]
    pub async fn release_allocation(
        &self,
        allocation_id: AggregateId,
        channel_id: &ChannelId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<ChannelAllocation> {
        if quantity == 0 {
            return Err(AllocationError::InvalidQuantity { quantity });
        }
        let _guard = self.locks.lock(product_id).await;

        let state = {
            let table = self.read();
            if !table
                .records
                .contains_key(&(product_id.clone(), channel_id.clone()))
            {
                return Err(AllocationError::ChannelAllocationNotFound {
                    channel_id: channel_id.clone(),
                    product_id: product_id.clone(),
                });
            }
            match table.entries.get(&allocation_id) {
                Some(entry) if &entry.channel_id != channel_id || &entry.product_id != product_id => {
                    return Err(AllocationError::AllocationMismatch {
                        allocation_id,
                        channel_id: channel_id.clone(),
                        product_id: product_id.clone(),
                    });
                }
                Some(entry) if entry.state == EntryState::Released => {
                    return Err(AllocationError::InvalidAllocationState {
                        allocation_id,
                        state: entry.state,
                        action: "release",
                    });
                }
                Some(entry) => entry.state,
                // Reservations made outside the engine are released from the
                // reserved bucket.
                None => EntryState::Reserved,
            }
        };

        self.ledger
            .release_stock(product_id, quantity, &allocation_id.to_string())
            .await?;

        let record = {
            let mut guard = self.write();
            let table = &mut *guard;
            let record = table.record_mut(product_id, channel_id);
            match state {
                EntryState::Confirmed => {
                    record.allocated_quantity = record.allocated_quantity.saturating_sub(quantity);
                }
                _ => {
                    record.reserved_quantity = record.reserved_quantity.saturating_sub(quantity);
                }
            }
            record.updated_at = Utc::now();
            let record = record.clone();

            if let Some(entry) = table.entries.get_mut(&allocation_id) {
                entry.quantity = entry.quantity.saturating_sub(quantity);
                if entry.quantity == 0 {
                    entry.state = EntryState::Released;
                }
            }
            record
        };

        tracing::info!(%allocation_id, quantity, "allocation released");
        self.publish(AllocationEvent::AllocationReleased {
            allocation_id,
            product_id: product_id.clone(),
            channel_id: channel_id.clone(),
            quantity,
        })
        .await;

        Ok(record)
    }

    /// Computes the rebalance targets for a product without applying them.
    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    pub async fn plan_rebalance(&self, product_id: &ProductId) -> Result<RebalanceOutcome> {
        let _guard = self.locks.lock(product_id).await;
        self.plan_locked(product_id).await
    }

    /// Redistributes available stock across the product's channels
    /// according to the engine's [`RebalancePolicy`].
    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    pub async fn rebalance_allocations(&self, product_id: &ProductId) -> Result<RebalanceOutcome> {
        let _guard = self.locks.lock(product_id).await;
        let outcome = self.plan_locked(product_id).await?;
        if outcome.targets.is_empty() {
            return Ok(outcome);
        }

        {
            let mut table = self.write();
            let now = Utc::now();
            for target in &outcome.targets {
                let record = table.record_mut(product_id, &target.channel_id);
                record.allocated_quantity = target.target;
                record.updated_at = now;
            }
        }

        tracing::info!(
            available = outcome.available,
            channels = outcome.targets.len(),
            policy = %outcome.policy,
            "allocations rebalanced"
        );
        self.publish(AllocationEvent::AllocationsRebalanced {
            product_id: product_id.clone(),
            available: outcome.available,
            targets: outcome.targets.clone(),
        })
        .await;

        Ok(outcome)
    }

    /// Aggregates the allocated quantity across a product's channels.
    ///
    /// Does not compare against channel-reported quantities.
    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    pub async fn sync_allocations(&self, product_id: &ProductId) -> Result<AllocationSummary> {
        let _guard = self.locks.lock(product_id).await;
        let channels = self.read().for_product(product_id);
        let total_allocated = channels.iter().map(|c| c.allocated_quantity).sum();

        self.publish(AllocationEvent::AllocationsSynced {
            product_id: product_id.clone(),
            channels: channels.iter().map(|c| c.channel_id.clone()).collect(),
            total_allocated,
        })
        .await;

        Ok(AllocationSummary {
            product_id: product_id.clone(),
            synced: true,
            channels,
            total_allocated,
        })
    }

    /// Sets a channel's allocated quantity and returns the previous one.
    #[tracing::instrument(skip(self), fields(product_id = %product_id, channel_id = %channel_id))]
    pub async fn apply_target(
        &self,
        product_id: &ProductId,
        channel_id: &ChannelId,
        quantity: u32,
    ) -> Result<u32> {
        let _guard = self.locks.lock(product_id).await;

        let previous = {
            let mut table = self.write();
            let record = table.record_mut(product_id, channel_id);
            let previous = record.allocated_quantity;
            record.allocated_quantity = quantity;
            record.updated_at = Utc::now();
            previous
        };

        if previous != quantity {
            self.publish(AllocationEvent::AllocationAdjusted {
                product_id: product_id.clone(),
                channel_id: channel_id.clone(),
                previous,
                quantity,
            })
            .await;
        }

        Ok(previous)
    }

    /// Sets a channel's priority and rebalance bounds for a product.
    #[tracing::instrument(skip(self), fields(product_id = %product_id, channel_id = %channel_id))]
    pub async fn configure_channel(
        &self,
        product_id: &ProductId,
        channel_id: &ChannelId,
        limits: ChannelLimits,
    ) -> Result<ChannelAllocation> {
        if let Some(max_level) = limits.max_level {
            if limits.min_level > max_level {
                return Err(AllocationError::InvalidLimits {
                    min_level: limits.min_level,
                    max_level,
                });
            }
        }

        let _guard = self.locks.lock(product_id).await;
        let mut table = self.write();
        let record = table.record_mut(product_id, channel_id);
        record.priority = limits.priority;
        record.min_level = limits.min_level;
        record.max_level = limits.max_level;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    /// Returns the record for a channel/product pair.
    pub fn get_allocation(
        &self,
        channel_id: &ChannelId,
        product_id: &ProductId,
    ) -> Option<ChannelAllocation> {
        self.read()
            .records
            .get(&(product_id.clone(), channel_id.clone()))
            .cloned()
    }

    /// Returns a product's records in descending priority order.
    pub fn allocations_for_product(&self, product_id: &ProductId) -> Vec<ChannelAllocation> {
        self.read().for_product(product_id)
    }

    /// Returns every record held by a channel, ordered by product.
    pub fn allocations_for_channel(&self, channel_id: &ChannelId) -> Vec<ChannelAllocation> {
        let mut records: Vec<_> = self
            .read()
            .records
            .values()
            .filter(|r| &r.channel_id == channel_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        records
    }

    /// Returns the audit entry of an admitted allocation.
    pub fn allocation_entry(&self, allocation_id: AggregateId) -> Option<AllocationEntry> {
        self.read().entries.get(&allocation_id).cloned()
    }

    async fn plan_locked(&self, product_id: &ProductId) -> Result<RebalanceOutcome> {
        let stock = self.ledger.get_stock(product_id).await?;
        let current = self.read().for_product(product_id);
        let available = stock.available();
        Ok(RebalanceOutcome {
            product_id: product_id.clone(),
            available,
            policy: self.policy,
            targets: compute_targets(self.policy, available, &current),
        })
    }

    fn reject(
        &self,
        allocation_id: AggregateId,
        product_id: &ProductId,
        channel_id: &ChannelId,
        quantity: u32,
        available: u32,
    ) -> AllocationResult {
        metrics::counter!("allocation_failures_total").increment(1);
        tracing::info!(quantity, available, "allocation rejected: insufficient stock");
        AllocationResult::insufficient(allocation_id, product_id.clone(), channel_id.clone(), quantity)
    }

    async fn publish(&self, event: AllocationEvent) {
        // The record change has already been applied; a lost event is logged
        // rather than reported as a failed allocation.
        if let Err(e) = self
            .transport
            .emit(event.product_id().as_str(), AGGREGATE_TYPE, &event)
            .await
        {
            tracing::error!(error = %e, event_type = event.event_type(), "failed to publish allocation event");
            metrics::counter!("event_publish_failures_total").increment(1);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, AllocationTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AllocationTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }
}
