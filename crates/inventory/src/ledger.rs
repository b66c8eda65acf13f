//! Stock ledger contract and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use common::ProductId;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// On-hand and reserved quantity for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: ProductId,
    /// Units on hand.
    pub quantity: u32,
    /// Units promised to allocations or orders.
    pub reserved: u32,
}

impl StockLevel {
    /// Creates a stock level with nothing reserved.
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
            reserved: 0,
        }
    }

    /// Units free to reserve.
    pub fn available(&self) -> u32 {
        self.quantity.saturating_sub(self.reserved)
    }
}

/// Canonical owner of stock quantities.
///
/// Every operation is atomic with respect to a single product. The
/// allocation engine and the sagas only ever change stock through this
/// trait.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Returns the current stock level. Unknown products have zero stock.
    async fn get_stock(&self, product_id: &ProductId) -> Result<StockLevel, LedgerError>;

    /// Returns the units `reference_id` currently holds for a product.
    async fn reserved_for(&self, product_id: &ProductId, reference_id: &str) -> Result<u32, LedgerError>;

    /// Reserves `quantity` units against `reference_id`.
    async fn reserve_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
        reference_id: &str,
    ) -> Result<StockLevel, LedgerError>;

    /// Releases `quantity` reserved units held by `reference_id`.
    async fn release_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
        reference_id: &str,
    ) -> Result<StockLevel, LedgerError>;

    /// Sets the on-hand quantity.
    async fn update_stock(
        &self,
        product_id: &ProductId,
        new_quantity: u32,
    ) -> Result<StockLevel, LedgerError>;
}

#[derive(Debug, Default)]
struct LedgerState {
    levels: HashMap<ProductId, StockLevel>,
    reservations: HashMap<(ProductId, String), u32>,
    unavailable: bool,
    failing_products: HashSet<ProductId>,
}

impl LedgerState {
    fn check(&self, product_id: &ProductId) -> Result<(), LedgerError> {
        if self.unavailable {
            return Err(LedgerError::Unavailable("ledger offline".to_string()));
        }
        if self.failing_products.contains(product_id) {
            return Err(LedgerError::Unavailable(format!(
                "injected failure for {product_id}"
            )));
        }
        Ok(())
    }

    fn held(&self, product_id: &ProductId, reference_id: &str) -> u32 {
        self.reservations
            .get(&(product_id.clone(), reference_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn level_mut(&mut self, product_id: &ProductId) -> &mut StockLevel {
        self.levels
            .entry(product_id.clone())
            .or_insert_with(|| StockLevel::new(product_id.clone(), 0))
    }
}

/// In-memory stock ledger for tests and local development.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockLedger {
    state: Arc<RwLock<LedgerState>>,
    latency: Option<Duration>,
}

impl InMemoryStockLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call by `latency`, simulating a remote ledger.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Seeds the on-hand quantity for a product, keeping its reservations.
    pub fn set_stock(&self, product_id: impl Into<ProductId>, quantity: u32) {
        let product_id = product_id.into();
        self.write().level_mut(&product_id).quantity = quantity;
    }

    /// Makes every call fail with [`LedgerError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.write().unavailable = unavailable;
    }

    /// Makes every call for one product fail with [`LedgerError::Unavailable`].
    pub fn fail_product(&self, product_id: impl Into<ProductId>) {
        self.write().failing_products.insert(product_id.into());
    }

    /// Clears product failures injected with [`fail_product`](Self::fail_product).
    pub fn clear_failures(&self) {
        self.write().failing_products.clear();
    }

    /// Returns the stock level without latency or failure injection.
    pub fn snapshot(&self, product_id: &ProductId) -> StockLevel {
        self.read()
            .levels
            .get(product_id)
            .cloned()
            .unwrap_or_else(|| StockLevel::new(product_id.clone(), 0))
    }

    /// Returns the units currently held by a reference.
    pub fn reserved_by(&self, product_id: &ProductId, reference_id: &str) -> u32 {
        self.read().held(product_id, reference_id)
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl StockLedger for InMemoryStockLedger {
    async fn get_stock(&self, product_id: &ProductId) -> Result<StockLevel, LedgerError> {
        self.simulate_latency().await;
        let state = self.read();
        state.check(product_id)?;
        Ok(state
            .levels
            .get(product_id)
            .cloned()
            .unwrap_or_else(|| StockLevel::new(product_id.clone(), 0)))
    }

    async fn reserved_for(&self, product_id: &ProductId, reference_id: &str) -> Result<u32, LedgerError> {
        self.simulate_latency().await;
        let state = self.read();
        state.check(product_id)?;
        Ok(state.held(product_id, reference_id))
    }

    async fn reserve_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
        reference_id: &str,
    ) -> Result<StockLevel, LedgerError> {
        self.simulate_latency().await;
        let mut state = self.write();
        state.check(product_id)?;

        let level = state.level_mut(product_id);
        let available = level.available();
        if available < quantity {
            return Err(LedgerError::InsufficientStock {
                product_id: product_id.clone(),
                requested: quantity,
                available,
            });
        }
        level.reserved += quantity;
        let level = level.clone();

        *state
            .reservations
            .entry((product_id.clone(), reference_id.to_string()))
            .or_insert(0) += quantity;

        tracing::debug!(%product_id, quantity, reference_id, "stock reserved");
        Ok(level)
    }

    async fn release_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
        reference_id: &str,
    ) -> Result<StockLevel, LedgerError> {
        self.simulate_latency().await;
        let mut state = self.write();
        state.check(product_id)?;

        let level = state.level_mut(product_id);
        level.reserved = level.reserved.saturating_sub(quantity);
        let level = level.clone();

        let key = (product_id.clone(), reference_id.to_string());
        if let Some(held) = state.reservations.get_mut(&key) {
            *held = held.saturating_sub(quantity);
            if *held == 0 {
                state.reservations.remove(&key);
            }
        }

        tracing::debug!(%product_id, quantity, reference_id, "stock released");
        Ok(level)
    }

    async fn update_stock(
        &self,
        product_id: &ProductId,
        new_quantity: u32,
    ) -> Result<StockLevel, LedgerError> {
        self.simulate_latency().await;
        let mut state = self.write();
        state.check(product_id)?;

        let level = state.level_mut(product_id);
        if new_quantity < level.reserved {
            return Err(LedgerError::BelowReserved {
                product_id: product_id.clone(),
                quantity: new_quantity,
                reserved: level.reserved,
            });
        }
        level.quantity = new_quantity;

        tracing::debug!(%product_id, new_quantity, "stock updated");
        Ok(level.clone())
    }
}
