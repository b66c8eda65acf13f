use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};

use crate::{
    EventEnvelope, EventQuery, Result,
    transport::{EventStream, EventSubscription, EventTransport},
};

const DEFAULT_CAPACITY: usize = 1024;

/// In-memory event transport for tests and local development.
///
/// Keeps every published event in an append-only log and fans each one out
/// to live subscribers.
#[derive(Clone)]
pub struct InMemoryEventTransport {
    events: Arc<RwLock<Vec<EventEnvelope>>>,
    sender: broadcast::Sender<EventEnvelope>,
}

impl InMemoryEventTransport {
    /// Creates a new empty transport.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a transport whose subscribers buffer up to `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            sender,
        }
    }

    /// Returns the total number of events published.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Returns the event types in publish order.
    pub async fn event_types(&self) -> Vec<String> {
        self.events
            .read()
            .await
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }

    /// Clears the history log.
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

impl Default for InMemoryEventTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventTransport for InMemoryEventTransport {
    async fn publish(&self, event: EventEnvelope) -> Result<()> {
        // The log lock is held while broadcasting so that history order and
        // delivery order agree.
        let mut log = self.events.write().await;
        tracing::debug!(
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            "publishing event"
        );
        log.push(event.clone());
        // No receivers is fine; the history log still has the event.
        let _ = self.sender.send(event);
        metrics::counter!("events_published_total").increment(1);
        Ok(())
    }

    fn subscribe(&self) -> EventSubscription {
        EventSubscription::new(self.sender.subscribe())
    }

    async fn query(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let log = self.events.read().await;
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(log
            .iter()
            .filter(|e| query.matches(e))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn stream_all(&self) -> Result<EventStream> {
        use futures_util::stream;

        let events = self.events.read().await.clone();
        let stream = stream::iter(events.into_iter().map(Ok));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::EventTransportExt;
    use futures_util::StreamExt;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct StockCounted {
        quantity: u32,
    }

    impl crate::DomainEvent for StockCounted {
        fn event_type(&self) -> &'static str {
            "StockCounted"
        }
    }

    fn create_test_event(aggregate_id: &str, event_type: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("Product")
            .event_type(event_type)
            .payload_raw(serde_json::json!({"test": true}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn publish_appends_to_history() {
        let transport = InMemoryEventTransport::new();
        transport
            .publish(create_test_event("SKU-001", "InventoryAllocated"))
            .await
            .unwrap();
        transport
            .publish(create_test_event("SKU-002", "AllocationReleased"))
            .await
            .unwrap();

        assert_eq!(transport.event_count().await, 2);
        assert_eq!(
            transport.event_types().await,
            vec!["InventoryAllocated", "AllocationReleased"]
        );
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let transport = InMemoryEventTransport::new();
        let mut first = transport.subscribe();
        let mut second = transport.subscribe();

        transport
            .publish(create_test_event("SKU-001", "A"))
            .await
            .unwrap();
        transport
            .publish(create_test_event("SKU-001", "B"))
            .await
            .unwrap();

        assert_eq!(first.recv().await.unwrap().event_type, "A");
        assert_eq!(first.recv().await.unwrap().event_type, "B");
        assert_eq!(second.recv().await.unwrap().event_type, "A");
        assert!(first.try_recv().is_none());
    }

    #[tokio::test]
    async fn late_subscriber_only_sees_new_events() {
        let transport = InMemoryEventTransport::new();
        transport
            .publish(create_test_event("SKU-001", "Before"))
            .await
            .unwrap();

        let mut sub = transport.subscribe();
        transport
            .publish(create_test_event("SKU-001", "After"))
            .await
            .unwrap();

        assert_eq!(sub.recv().await.unwrap().event_type, "After");
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_to_newest() {
        let transport = InMemoryEventTransport::with_capacity(2);
        let mut sub = transport.subscribe();

        for event_type in ["A", "B", "C", "D"] {
            transport
                .publish(create_test_event("SKU-001", event_type))
                .await
                .unwrap();
        }

        assert_eq!(sub.recv().await.unwrap().event_type, "C");
        assert_eq!(sub.recv().await.unwrap().event_type, "D");
    }

    #[tokio::test]
    async fn query_with_filters_and_paging() {
        let transport = InMemoryEventTransport::new();
        for i in 0..5 {
            transport
                .publish(create_test_event("SKU-001", &format!("E{i}")))
                .await
                .unwrap();
        }
        transport
            .publish(create_test_event("SKU-002", "E0"))
            .await
            .unwrap();

        let events = transport
            .query(EventQuery::for_aggregate("SKU-001").offset(1).limit(2))
            .await
            .unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["E1", "E2"]);

        let by_type = transport.events_of_type("E0").await.unwrap();
        assert_eq!(by_type.len(), 2);
    }

    #[tokio::test]
    async fn emit_wraps_domain_event() {
        let transport = InMemoryEventTransport::new();
        let envelope = transport
            .emit("SKU-001", "Product", &StockCounted { quantity: 12 })
            .await
            .unwrap();

        assert_eq!(envelope.event_type, "StockCounted");
        assert_eq!(envelope.aggregate_type, "Product");
        assert_eq!(envelope.payload["quantity"], 12);
    }

    #[tokio::test]
    async fn stream_all_returns_history() {
        let transport = InMemoryEventTransport::new();
        transport
            .publish(create_test_event("SKU-001", "A"))
            .await
            .unwrap();
        transport
            .publish(create_test_event("SKU-002", "B"))
            .await
            .unwrap();

        let stream = transport.stream_all().await.unwrap();
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].as_ref().unwrap().event_type, "B");
    }
}
