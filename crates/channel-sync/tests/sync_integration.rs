//! Integration tests for channel sync.
//!
//! Channels run against in-memory adapters sharing one allocation engine and
//! event transport.

use std::sync::Arc;
use std::time::Duration;

use channel_sync::{
    ChannelEvent, ChannelSettings, ChannelStatus, ChannelType, InMemoryChannelAdapter,
    SyncConfig, SyncDirection, SyncError, SyncOptions, SyncOrchestrator, SyncScheduler,
    WebhookIngestor,
};
use common::{ChannelId, ProductId};
use event_bus::{EventTransportExt, InMemoryEventTransport};
use inventory::{
    AllocationEngine, ConflictConfig, ConflictResolver, ConflictType, InMemoryStockLedger,
    ResolutionStrategy,
};
use serde_json::json;

struct TestHarness {
    transport: InMemoryEventTransport,
    engine: Arc<AllocationEngine>,
    orchestrator: Arc<SyncOrchestrator>,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    fn with_config(config: SyncConfig) -> Self {
        let transport = InMemoryEventTransport::new();
        let engine = Arc::new(AllocationEngine::new(
            Arc::new(InMemoryStockLedger::new()),
            Arc::new(transport.clone()),
        ));
        let resolver = ConflictResolver::new(
            ConflictConfig::default()
                .with_rank("shopify", 1)
                .with_rank("amazon", 2),
        );
        let orchestrator = Arc::new(
            SyncOrchestrator::new(engine.clone(), Arc::new(transport.clone()))
                .with_resolver(resolver)
                .with_config(config),
        );
        Self {
            transport,
            engine,
            orchestrator,
        }
    }

    async fn connect(&self, id: &str, settings: ChannelSettings) -> InMemoryChannelAdapter {
        self.connect_adapter(id, settings, InMemoryChannelAdapter::new())
            .await
    }

    async fn connect_adapter(
        &self,
        id: &str,
        settings: ChannelSettings,
        adapter: InMemoryChannelAdapter,
    ) -> InMemoryChannelAdapter {
        self.orchestrator
            .connect_channel(
                ChannelId::new(id),
                ChannelType::Custom(id.to_string()),
                settings,
                Arc::new(adapter.clone()),
            )
            .await
            .unwrap();
        adapter
    }

    async fn channel_events(&self, event_type: &str) -> Vec<ChannelEvent> {
        self.transport
            .events_of_type(event_type)
            .await
            .unwrap()
            .iter()
            .map(|e| e.decode().unwrap())
            .collect()
    }

    fn allocated(&self, channel: &str, product: &str) -> Option<u32> {
        self.engine
            .get_allocation(&ChannelId::new(channel), &ProductId::new(product))
            .map(|a| a.allocated_quantity)
    }
}

fn strategy_settings(strategy: ResolutionStrategy) -> ChannelSettings {
    ChannelSettings::default().with_conflict_strategy(strategy)
}

mod reconciliation {
    use super::*;

    #[tokio::test]
    async fn test_conflict_resolved_by_source_priority() {
        let h = TestHarness::new();
        let shopify = h
            .connect("shopify", strategy_settings(ResolutionStrategy::SourcePriority))
            .await;
        let amazon = h
            .connect("amazon", strategy_settings(ResolutionStrategy::SourcePriority))
            .await;
        shopify.set_records("inventory", vec![json!({"sku": "SKU-001", "quantity": 40})]);
        amazon.set_records("inventory", vec![json!({"sku": "SKU-001", "quantity": 25})]);

        let first = h
            .orchestrator
            .sync_channel(&ChannelId::new("shopify"), SyncOptions::default())
            .await
            .unwrap();
        assert!(first.conflicts.is_empty());
        assert_eq!(first.discrepancies, vec![ProductId::new("SKU-001")]);

        let second = h
            .orchestrator
            .sync_channel(&ChannelId::new("amazon"), SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(second.conflicts.len(), 1);
        let conflict = &second.conflicts[0];
        assert_eq!(conflict.detection.variance, 15);
        assert_eq!(conflict.detection.conflict_type, ConflictType::Major);
        assert_eq!(conflict.resolution.quantity(), Some(40));
        assert_eq!(conflict.losing_channels, vec![ChannelId::new("amazon")]);

        assert_eq!(h.allocated("shopify", "SKU-001"), Some(40));
        assert_eq!(h.allocated("amazon", "SKU-001"), Some(40));

        let amazon_channel = h.orchestrator.channel(&ChannelId::new("amazon")).unwrap();
        assert_eq!(amazon_channel.metrics.conflict_count, 1);
        assert_eq!(amazon_channel.metrics.sync_count, 1);

        let discrepancies = h.channel_events("SyncDiscrepancyDetected").await;
        assert_eq!(discrepancies.len(), 2);
        assert!(matches!(
            &discrepancies[1],
            ChannelEvent::SyncDiscrepancyDetected {
                conflict_type: Some(ConflictType::Major),
                variance: 15,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_outbound_sync_pushes_corrections() {
        let h = TestHarness::new();
        h.connect("shopify", strategy_settings(ResolutionStrategy::SourcePriority))
            .await
            .set_records("inventory", vec![json!({"sku": "SKU-001", "quantity": 40})]);
        let amazon = h
            .connect("amazon", strategy_settings(ResolutionStrategy::SourcePriority))
            .await;
        amazon.set_records("inventory", vec![json!({"sku": "SKU-001", "quantity": 25})]);

        let amazon_id = ChannelId::new("amazon");
        h.orchestrator
            .sync_channel(&ChannelId::new("shopify"), SyncOptions::default())
            .await
            .unwrap();
        h.orchestrator
            .sync_channel(&amazon_id, SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(
            h.orchestrator.pending_corrections(&amazon_id),
            vec![ProductId::new("SKU-001")]
        );

        let report = h
            .orchestrator
            .sync_channel(&amazon_id, SyncOptions::new(SyncDirection::Outbound))
            .await
            .unwrap();

        assert_eq!(report.records_fetched, 0);
        assert_eq!(report.records_pushed, 1);
        let pushed = amazon.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].0, "inventory");
        assert_eq!(pushed[0].1[0]["sku"], "SKU-001");
        assert_eq!(pushed[0].1[0]["quantity"], 40);
        assert!(h.orchestrator.pending_corrections(&amazon_id).is_empty());
    }

    #[tokio::test]
    async fn test_manual_strategy_queues_review() {
        let h = TestHarness::new();
        h.connect("shopify", strategy_settings(ResolutionStrategy::Manual))
            .await
            .set_records("inventory", vec![json!({"sku": "SKU-001", "quantity": 12})]);
        h.connect("amazon", strategy_settings(ResolutionStrategy::Manual))
            .await
            .set_records("inventory", vec![json!({"sku": "SKU-001", "quantity": 9})]);

        h.orchestrator
            .sync_channel(&ChannelId::new("shopify"), SyncOptions::default())
            .await
            .unwrap();
        let report = h
            .orchestrator
            .sync_channel(&ChannelId::new("amazon"), SyncOptions::default())
            .await
            .unwrap();

        let review_id = report.conflicts[0].review_id.unwrap();
        assert!(!report.conflicts[0].resolution.is_resolved());
        assert_eq!(h.orchestrator.reviews().len(), 1);
        assert_eq!(h.allocated("amazon", "SKU-001"), None);

        let outcome = h.orchestrator.resolve_review(review_id, 10).await.unwrap();
        assert_eq!(outcome.resolution.quantity(), Some(10));
        assert_eq!(
            outcome.losing_channels,
            vec![ChannelId::new("shopify"), ChannelId::new("amazon")]
        );
        assert_eq!(h.allocated("shopify", "SKU-001"), Some(10));
        assert_eq!(h.allocated("amazon", "SKU-001"), Some(10));
        assert!(h.orchestrator.reviews().is_empty());

        let err = h
            .orchestrator
            .resolve_review(review_id, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ReviewNotFound(_)));
    }

    #[tokio::test]
    async fn test_unmappable_records_are_skipped() {
        let h = TestHarness::new();
        h.connect("shopify", ChannelSettings::default())
            .await
            .set_records(
                "inventory",
                vec![
                    json!({"sku": "SKU-001", "quantity": -3}),
                    json!({"sku": "SKU-002", "quantity": "0"}),
                    json!("not a record"),
                ],
            );

        let report = h
            .orchestrator
            .sync_channel(&ChannelId::new("shopify"), SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(report.records_fetched, 3);
        assert_eq!(report.records_applied, 1);
        assert_eq!(report.records_skipped, 2);
    }
}

mod run_control {
    use super::*;

    #[tokio::test]
    async fn test_rate_limited_sync_keeps_channel_status() {
        let h = TestHarness::new();
        h.connect(
            "shopify",
            ChannelSettings::default().with_rate_limit("inventory:read", 1),
        )
        .await;
        let id = ChannelId::new("shopify");

        h.orchestrator
            .sync_channel(&id, SyncOptions::default())
            .await
            .unwrap();
        let err = h
            .orchestrator
            .sync_channel(&id, SyncOptions::default())
            .await
            .unwrap_err();

        match err {
            SyncError::RateLimitExceeded {
                resource,
                retry_after,
                ..
            } => {
                assert_eq!(resource, "inventory:read");
                assert!(retry_after <= Duration::from_secs(60));
            }
            other => panic!("expected rate limit error, got {other:?}"),
        }

        let channel = h.orchestrator.channel(&id).unwrap();
        assert_eq!(channel.status, ChannelStatus::Connected);
        assert_eq!(channel.metrics.error_count, 0);
        assert!(h.channel_events("channel:error").await.is_empty());
    }

    #[tokio::test]
    async fn test_adapter_failure_moves_channel_to_error() {
        let h = TestHarness::new();
        let adapter = h.connect("shopify", ChannelSettings::default()).await;
        let id = ChannelId::new("shopify");
        adapter.set_fail_fetch(true);

        let err = h
            .orchestrator
            .sync_channel(&id, SyncOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Adapter { operation: "fetch_resources", .. }));

        let channel = h.orchestrator.channel(&id).unwrap();
        assert_eq!(channel.status, ChannelStatus::Error);
        assert_eq!(channel.metrics.error_count, 1);
        assert!(channel.last_error.is_some());
        assert_eq!(h.channel_events("channel:error").await.len(), 1);

        adapter.set_fail_fetch(false);
        h.orchestrator
            .sync_channel(&id, SyncOptions::default())
            .await
            .unwrap();
        let channel = h.orchestrator.channel(&id).unwrap();
        assert_eq!(channel.status, ChannelStatus::Connected);
        assert!(channel.last_sync_at.is_some());
        assert!(channel.last_error.is_none());
    }

    #[tokio::test]
    async fn test_adapter_timeout() {
        let h = TestHarness::with_config(
            SyncConfig::default().with_adapter_timeout(Duration::from_millis(20)),
        );
        let slow = InMemoryChannelAdapter::new().with_latency(Duration::from_millis(200));
        let err = h
            .orchestrator
            .connect_channel(
                ChannelId::new("shopify"),
                ChannelType::Shopify,
                ChannelSettings::default(),
                Arc::new(slow),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::AdapterTimeout {
                operation: "connect",
                timeout_ms: 20,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_overlapping_syncs_are_rejected() {
        let h = TestHarness::new();
        h.connect_adapter(
            "shopify",
            ChannelSettings::default(),
            InMemoryChannelAdapter::new().with_latency(Duration::from_millis(100)),
        )
        .await;
        let id = ChannelId::new("shopify");

        let (a, b) = tokio::join!(
            h.orchestrator.sync_channel(&id, SyncOptions::default()),
            h.orchestrator.sync_channel(&id, SyncOptions::default()),
        );

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(SyncError::SyncInProgress(_))))
        );
        assert!(!h.orchestrator.is_syncing(&id));
    }

    #[tokio::test]
    async fn test_reconnect_keeps_metrics() {
        let h = TestHarness::new();
        let adapter = h.connect("shopify", ChannelSettings::default()).await;
        let id = ChannelId::new("shopify");
        h.orchestrator
            .sync_channel(&id, SyncOptions::default())
            .await
            .unwrap();
        h.orchestrator.disconnect_channel(&id).await.unwrap();

        let err = h
            .orchestrator
            .sync_channel(&id, SyncOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ChannelNotConnected { .. }));

        h.connect_adapter("shopify", ChannelSettings::default(), adapter)
            .await;
        let channel = h.orchestrator.channel(&id).unwrap();
        assert_eq!(channel.metrics.sync_count, 1);
        assert_eq!(channel.status, ChannelStatus::Connected);
        assert_eq!(h.channel_events("channel:connected").await.len(), 2);
        assert_eq!(h.channel_events("channel:disconnected").await.len(), 1);
    }
}

mod scheduling {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_runs_periodic_syncs() {
        let h = TestHarness::new();
        let adapter = h
            .connect(
                "shopify",
                ChannelSettings::default().with_sync_interval(Duration::from_secs(10)),
            )
            .await;
        h.connect(
            "amazon",
            ChannelSettings::default().with_sync_enabled(false),
        )
        .await;

        let scheduler = SyncScheduler::new(h.orchestrator.clone());
        assert_eq!(scheduler.start(), 1);
        assert_eq!(scheduler.scheduled(), vec![ChannelId::new("shopify")]);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(adapter.fetch_count(), 2);

        scheduler.stop().await;
        assert!(scheduler.scheduled().is_empty());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(adapter.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unschedule_stops_channel() {
        let h = TestHarness::new();
        let adapter = h
            .connect(
                "shopify",
                ChannelSettings::default().with_sync_interval(Duration::from_secs(5)),
            )
            .await;
        let id = ChannelId::new("shopify");
        let scheduler = SyncScheduler::new(h.orchestrator.clone());

        scheduler.schedule(&id).unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(adapter.fetch_count(), 1);

        assert!(scheduler.unschedule(&id));
        assert!(!scheduler.unschedule(&id));
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(adapter.fetch_count(), 1);

        assert!(matches!(
            scheduler.schedule(&ChannelId::new("missing")),
            Err(SyncError::ChannelNotFound(_))
        ));
    }
}

mod webhooks {
    use super::*;

    #[tokio::test]
    async fn test_webhook_resolves_conflict() {
        let h = TestHarness::new();
        let settings = strategy_settings(ResolutionStrategy::Conservative).with_webhooks(true);
        h.connect("shopify", settings.clone()).await;
        h.connect("amazon", settings).await;
        let ingestor = WebhookIngestor::new(h.orchestrator.clone());

        ingestor
            .handle_webhook(
                &ChannelId::new("shopify"),
                "inventory_levels/update",
                &json!({"sku": "SKU-001", "quantity": 8}),
            )
            .await
            .unwrap();
        let outcome = ingestor
            .handle_webhook(
                &ChannelId::new("amazon"),
                "inventory_levels/update",
                &json!({"items": [{"sku": "SKU-001", "quantity": 5}]}),
            )
            .await
            .unwrap();

        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].resolution.quantity(), Some(5));
        assert_eq!(h.allocated("shopify", "SKU-001"), Some(5));
        assert_eq!(h.channel_events("webhook:processed").await.len(), 2);
    }

    #[tokio::test]
    async fn test_accepted_webhook_processes_in_background() {
        let h = TestHarness::new();
        h.connect("shopify", ChannelSettings::default().with_webhooks(true))
            .await;
        let ingestor = WebhookIngestor::new(h.orchestrator.clone());

        ingestor
            .accept(
                &ChannelId::new("shopify"),
                "inventory_levels/update",
                json!({"sku": "SKU-001", "quantity": 3}),
            )
            .unwrap();

        let mut processed = Vec::new();
        for _ in 0..50 {
            processed = h.channel_events("webhook:processed").await;
            if !processed.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(processed.len(), 1);
        assert_eq!(
            h.channel_events("SyncDiscrepancyDetected").await.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_webhook_rejected_after_disconnect() {
        let h = TestHarness::new();
        h.connect("shopify", ChannelSettings::default().with_webhooks(true))
            .await;
        let id = ChannelId::new("shopify");
        h.orchestrator.disconnect_channel(&id).await.unwrap();

        let ingestor = WebhookIngestor::new(h.orchestrator.clone());
        let err = ingestor
            .accept(&id, "inventory_levels/update", json!({"sku": "SKU-001", "quantity": 3}))
            .unwrap_err();
        assert!(matches!(
            err,
            channel_sync::WebhookError::ChannelNotConnected {
                status: ChannelStatus::Disconnected,
                ..
            }
        ));
    }
}
