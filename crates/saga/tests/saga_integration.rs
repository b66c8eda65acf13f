//! Integration tests for the inventory sagas.
//!
//! Every saga runs against the in-memory ledger and event transport so the
//! tests can compare stock before and after a rolled-back run.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use common::{ChannelId, ProductId};
use event_bus::{EventTransportExt, InMemoryEventTransport};
use inventory::{
    AllocationEngine, ChannelLimits, InMemoryStockLedger, LedgerError, StockLedger, StockLevel,
};
use saga::{
    BulkTransferSaga, ChannelRequest, ExecutorConfig, FulfillmentSaga, InventorySagaEvent,
    MultiChannelAllocationSaga, Order, OrderLine, OrderReservationSaga, RebalanceSaga,
    SagaContext, SagaError, SagaState, StockTransfer,
};
use tokio::sync::watch;

struct TestHarness {
    ledger: InMemoryStockLedger,
    transport: InMemoryEventTransport,
    ctx: SagaContext,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_ledger(InMemoryStockLedger::new(), None)
    }

    /// Builds the harness on top of `ledger`, optionally routing ledger calls
    /// through a wrapper.
    fn with_ledger(ledger: InMemoryStockLedger, wrapper: Option<Arc<dyn StockLedger>>) -> Self {
        let transport = InMemoryEventTransport::new();
        let engine_ledger = wrapper.unwrap_or_else(|| Arc::new(ledger.clone()));
        let engine = Arc::new(AllocationEngine::new(
            engine_ledger,
            Arc::new(transport.clone()),
        ));
        let ctx = SagaContext::new(engine, Arc::new(transport.clone()), ExecutorConfig::default());
        Self {
            ledger,
            transport,
            ctx,
        }
    }

    fn level(&self, product: &str) -> StockLevel {
        self.ledger.snapshot(&ProductId::new(product))
    }

    async fn saga_events(&self, event_type: &str) -> Vec<InventorySagaEvent> {
        self.transport
            .events_of_type(event_type)
            .await
            .unwrap()
            .iter()
            .map(|e| e.decode().unwrap())
            .collect()
    }
}

/// Delegates to the in-memory ledger but rejects releases or stock updates
/// for chosen products.
struct FaultyLedger {
    inner: InMemoryStockLedger,
    fail_release: Mutex<HashSet<ProductId>>,
    fail_update: Mutex<HashSet<ProductId>>,
}

impl FaultyLedger {
    fn new(inner: InMemoryStockLedger) -> Self {
        Self {
            inner,
            fail_release: Mutex::new(HashSet::new()),
            fail_update: Mutex::new(HashSet::new()),
        }
    }

    fn fail_release_for(&self, product: &str) {
        Self::insert(&self.fail_release, product);
    }

    fn fail_update_for(&self, product: &str) {
        Self::insert(&self.fail_update, product);
    }

    fn insert(set: &Mutex<HashSet<ProductId>>, product: &str) {
        set.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ProductId::new(product));
    }

    fn fails(set: &Mutex<HashSet<ProductId>>, product_id: &ProductId) -> bool {
        set.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(product_id)
    }
}

#[async_trait]
impl StockLedger for FaultyLedger {
    async fn get_stock(&self, product_id: &ProductId) -> Result<StockLevel, LedgerError> {
        self.inner.get_stock(product_id).await
    }

    async fn reserved_for(&self, product_id: &ProductId, reference_id: &str) -> Result<u32, LedgerError> {
        self.inner.reserved_for(product_id, reference_id).await
    }

    async fn reserve_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
        reference_id: &str,
    ) -> Result<StockLevel, LedgerError> {
        self.inner
            .reserve_stock(product_id, quantity, reference_id)
            .await
    }

    async fn release_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
        reference_id: &str,
    ) -> Result<StockLevel, LedgerError> {
        if Self::fails(&self.fail_release, product_id) {
            return Err(LedgerError::Unavailable("release rejected".to_string()));
        }
        self.inner
            .release_stock(product_id, quantity, reference_id)
            .await
    }

    async fn update_stock(
        &self,
        product_id: &ProductId,
        new_quantity: u32,
    ) -> Result<StockLevel, LedgerError> {
        if Self::fails(&self.fail_update, product_id) {
            return Err(LedgerError::Unavailable("update rejected".to_string()));
        }
        self.inner.update_stock(product_id, new_quantity).await
    }
}

mod order_reservation {
    use super::*;

    fn order() -> Order {
        Order::new(
            "ORD-1",
            vec![OrderLine::new("SKU-001", 2), OrderLine::new("SKU-002", 5)],
        )
    }

    #[tokio::test]
    async fn test_reserves_every_line() {
        let h = TestHarness::new();
        h.ledger.set_stock("SKU-001", 10);
        h.ledger.set_stock("SKU-002", 10);

        let result = OrderReservationSaga::new(h.ctx.clone())
            .run(&order())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.state, SagaState::Completed);
        assert_eq!(h.level("SKU-001").reserved, 2);
        assert_eq!(h.level("SKU-002").reserved, 5);
        assert_eq!(h.saga_events("InventoryReservedForOrder").await.len(), 1);
    }

    #[tokio::test]
    async fn test_second_line_failure_releases_first() {
        let h = TestHarness::new();
        h.ledger.set_stock("SKU-001", 10);
        h.ledger.set_stock("SKU-002", 3);
        let before = (h.level("SKU-001"), h.level("SKU-002"));

        let result = OrderReservationSaga::new(h.ctx.clone())
            .run(&order())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.state, SagaState::Failed);
        assert!(matches!(
            result.error,
            Some(SagaError::Ledger(LedgerError::InsufficientStock { .. }))
        ));
        assert_eq!(result.compensated_steps, vec!["Reserve inventory for item 1"]);
        assert_eq!((h.level("SKU-001"), h.level("SKU-002")), before);

        let failed = h.saga_events("InventoryReservationFailed").await;
        match failed.as_slice() {
            [InventorySagaEvent::InventoryReservationFailed {
                order_id,
                compensated_steps,
                ..
            }] => {
                assert_eq!(order_id, "ORD-1");
                assert_eq!(compensated_steps, &vec!["Reserve inventory for item 1".to_string()]);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_order_is_rejected_before_running() {
        let h = TestHarness::new();
        let err = OrderReservationSaga::new(h.ctx.clone())
            .run(&Order::new("ORD-1", vec![]))
            .await
            .unwrap_err();

        assert!(matches!(err, SagaError::Validation(_)));
        assert_eq!(h.transport.event_count().await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_reserves_nothing() {
        let h = TestHarness::new();
        h.ledger.set_stock("SKU-001", 10);
        h.ledger.set_stock("SKU-002", 10);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();

        let result = OrderReservationSaga::new(h.ctx.clone())
            .run_with_cancel(&order(), cancel_rx)
            .await
            .unwrap();

        assert!(!result.success);
        assert!(matches!(result.error, Some(SagaError::Cancelled { .. })));
        assert_eq!(h.level("SKU-001").reserved, 0);
        assert_eq!(h.level("SKU-002").reserved, 0);
    }

    #[tokio::test]
    async fn test_failed_release_publishes_compensation_incomplete() {
        let ledger = InMemoryStockLedger::new();
        let failing = Arc::new(FaultyLedger::new(ledger.clone()));
        let h = TestHarness::with_ledger(ledger, Some(failing.clone()));
        h.ledger.set_stock("SKU-001", 10);
        h.ledger.set_stock("SKU-002", 3);
        failing.fail_release_for("SKU-001");

        let result = OrderReservationSaga::new(h.ctx.clone())
            .run(&order())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.state, SagaState::CompensationIncomplete);
        assert!(result.needs_reconciliation());
        assert!(result.compensated_steps.is_empty());
        assert_eq!(result.compensation_failures.len(), 1);
        assert_eq!(
            result.compensation_failures[0].step,
            "Reserve inventory for item 1"
        );
        // The triggering error is still the reservation failure.
        assert!(matches!(
            result.error,
            Some(SagaError::Ledger(LedgerError::InsufficientStock { .. }))
        ));
        assert_eq!(h.level("SKU-001").reserved, 2);
        assert_eq!(h.saga_events("SagaCompensationIncomplete").await.len(), 1);
    }
}

mod bulk_transfer {
    use super::*;

    #[tokio::test]
    async fn test_moves_stock_between_records() {
        let h = TestHarness::new();
        h.ledger.set_stock("WH-A", 20);
        h.ledger.set_stock("WH-B", 5);

        let result = BulkTransferSaga::new(h.ctx.clone())
            .run(&[StockTransfer::new("WH-A", "WH-B", 8)])
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(h.level("WH-A").quantity, 12);
        assert_eq!(h.level("WH-B").quantity, 13);
        assert_eq!(h.saga_events("StockTransferred").await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_transfer_restores_all_quantities() {
        let h = TestHarness::new();
        h.ledger.set_stock("WH-A", 20);
        h.ledger.set_stock("WH-B", 5);
        h.ledger.set_stock("WH-C", 1);
        let before = [h.level("WH-A"), h.level("WH-B"), h.level("WH-C")];

        let result = BulkTransferSaga::new(h.ctx.clone())
            .run(&[
                StockTransfer::new("WH-A", "WH-B", 8),
                StockTransfer::new("WH-C", "WH-A", 4),
            ])
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(
            result.compensated_steps,
            vec!["Add 8 units to WH-B", "Remove 8 units from WH-A"]
        );
        assert_eq!(
            [h.level("WH-A"), h.level("WH-B"), h.level("WH-C")],
            before
        );
        assert_eq!(h.saga_events("StockTransferFailed").await.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_self_transfer() {
        let h = TestHarness::new();
        let err = BulkTransferSaga::new(h.ctx.clone())
            .run(&[StockTransfer::new("WH-A", "WH-A", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::Validation(_)));
    }
}

mod multi_channel {
    use super::*;

    #[tokio::test]
    async fn test_allocates_in_priority_order() {
        let h = TestHarness::new();
        h.ledger.set_stock("SKU-001", 30);
        let product = ProductId::new("SKU-001");

        let result = MultiChannelAllocationSaga::new(h.ctx.clone())
            .run(
                &product,
                &[
                    ChannelRequest::new("ebay", 5, 1),
                    ChannelRequest::new("shopify", 10, 5),
                ],
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(h.level("SKU-001").reserved, 15);
        let completed = h.saga_events("ChannelAllocationsCompleted").await;
        match completed.as_slice() {
            [InventorySagaEvent::ChannelAllocationsCompleted { allocations, .. }] => {
                assert_eq!(
                    allocations,
                    &vec![
                        (ChannelId::new("shopify"), 10),
                        (ChannelId::new("ebay"), 5)
                    ]
                );
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shortage_releases_earlier_channels() {
        let h = TestHarness::new();
        h.ledger.set_stock("SKU-001", 12);
        let product = ProductId::new("SKU-001");
        let before = h.level("SKU-001");

        let result = MultiChannelAllocationSaga::new(h.ctx.clone())
            .run(
                &product,
                &[
                    ChannelRequest::new("shopify", 10, 5),
                    ChannelRequest::new("ebay", 5, 1),
                ],
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.compensated_steps, vec!["Allocate 10 units to shopify"]);
        assert_eq!(h.level("SKU-001"), before);
        let shopify = h
            .ctx
            .engine()
            .get_allocation(&ChannelId::new("shopify"), &product)
            .unwrap();
        assert_eq!(shopify.allocated_quantity, 0);
        assert_eq!(shopify.reserved_quantity, 0);
    }
}

mod rebalance {
    use super::*;

    #[tokio::test]
    async fn test_applies_even_split() {
        let h = TestHarness::new();
        h.ledger.set_stock("SKU-001", 90);
        let product = ProductId::new("SKU-001");
        let engine = h.ctx.engine();
        for (channel, priority) in [("shopify", 3), ("amazon", 2), ("ebay", 1)] {
            engine
                .configure_channel(&product, &ChannelId::new(channel), ChannelLimits::with_priority(priority))
                .await
                .unwrap();
        }

        let result = RebalanceSaga::new(h.ctx.clone()).run(&product).await.unwrap();

        assert!(result.success);
        assert_eq!(result.results.len(), 3);
        let allocated: Vec<u32> = ["shopify", "amazon", "ebay"]
            .iter()
            .map(|c| {
                engine
                    .get_allocation(&ChannelId::new(*c), &product)
                    .unwrap()
                    .allocated_quantity
            })
            .collect();
        assert_eq!(allocated, vec![30, 30, 30]);
        assert_eq!(h.saga_events("RebalanceApplied").await.len(), 1);
    }

    #[tokio::test]
    async fn test_nothing_to_change_is_a_successful_no_op() {
        let h = TestHarness::new();
        let product = ProductId::new("SKU-404");

        let result = RebalanceSaga::new(h.ctx.clone()).run(&product).await.unwrap();

        assert!(result.success);
        assert!(result.results.is_empty());
    }
}

mod fulfillment {
    use super::*;

    #[tokio::test]
    async fn test_ships_reserved_lines() {
        let h = TestHarness::new();
        h.ledger.set_stock("SKU-001", 10);
        h.ledger.set_stock("SKU-002", 10);
        let order = Order::new(
            "ORD-1",
            vec![OrderLine::new("SKU-001", 2), OrderLine::new("SKU-002", 3)],
        );
        let reserved = OrderReservationSaga::new(h.ctx.clone())
            .run(&order)
            .await
            .unwrap();
        assert!(reserved.success);

        let result = FulfillmentSaga::new(h.ctx.clone()).run(&order).await.unwrap();

        assert!(result.success);
        assert_eq!(h.level("SKU-001"), StockLevel::new(ProductId::new("SKU-001"), 8));
        assert_eq!(h.level("SKU-002"), StockLevel::new(ProductId::new("SKU-002"), 7));
        assert_eq!(h.saga_events("InventoryFulfilled").await.len(), 1);
    }

    #[tokio::test]
    async fn test_unreserved_order_fails_validation() {
        let h = TestHarness::new();
        h.ledger.set_stock("SKU-001", 10);
        let order = Order::new("ORD-1", vec![OrderLine::new("SKU-001", 2)]);

        let result = FulfillmentSaga::new(h.ctx.clone()).run(&order).await.unwrap();

        assert!(!result.success);
        assert!(matches!(result.error, Some(SagaError::Validation(_))));
        assert!(result.compensated_steps.is_empty());
        assert_eq!(h.level("SKU-001").quantity, 10);
        assert_eq!(h.saga_events("InventoryFulfillmentFailed").await.len(), 1);
    }

    #[tokio::test]
    async fn test_another_orders_reservation_does_not_cover_fulfillment() {
        let h = TestHarness::new();
        h.ledger.set_stock("SKU-001", 10);
        let reserved = OrderReservationSaga::new(h.ctx.clone())
            .run(&Order::new("ORD-A", vec![OrderLine::new("SKU-001", 5)]))
            .await
            .unwrap();
        assert!(reserved.success);

        let result = FulfillmentSaga::new(h.ctx.clone())
            .run(&Order::new("ORD-B", vec![OrderLine::new("SKU-001", 5)]))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(matches!(result.error, Some(SagaError::Validation(_))));
        let level = h.level("SKU-001");
        assert_eq!((level.quantity, level.reserved), (10, 5));
        assert_eq!(h.ledger.reserved_by(&ProductId::new("SKU-001"), "ORD-A"), 5);
    }

    #[tokio::test]
    async fn test_failed_shipment_restores_shipped_lines() {
        let ledger = InMemoryStockLedger::new();
        let faulty = Arc::new(FaultyLedger::new(ledger.clone()));
        let h = TestHarness::with_ledger(ledger, Some(faulty.clone()));
        h.ledger.set_stock("SKU-001", 10);
        h.ledger.set_stock("SKU-002", 10);
        let order = Order::new(
            "ORD-1",
            vec![OrderLine::new("SKU-001", 2), OrderLine::new("SKU-002", 3)],
        );
        let reserved = OrderReservationSaga::new(h.ctx.clone())
            .run(&order)
            .await
            .unwrap();
        assert!(reserved.success);
        let before_first = h.level("SKU-001");
        let before_second = h.level("SKU-002");
        faulty.fail_update_for("SKU-002");

        let result = FulfillmentSaga::new(h.ctx.clone()).run(&order).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.state, SagaState::Failed);
        assert_eq!(result.compensated_steps, vec!["Ship item 1"]);
        assert_eq!(h.level("SKU-001"), before_first);
        assert_eq!(h.level("SKU-002"), before_second);
        assert_eq!(h.ledger.reserved_by(&ProductId::new("SKU-001"), "ORD-1"), 2);
        assert_eq!(h.ledger.reserved_by(&ProductId::new("SKU-002"), "ORD-1"), 3);
        assert_eq!(h.saga_events("InventoryFulfillmentFailed").await.len(), 1);
    }
}
