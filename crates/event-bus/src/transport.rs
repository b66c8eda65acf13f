use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::{DomainEvent, EventEnvelope, EventQuery, Result};

/// A stream of published events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Publish/subscribe contract for domain events.
///
/// Publishing is append-only and safe to call concurrently from many sagas
/// and sync runs. Every subscriber sees every event published after it
/// subscribed, in publish order.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Publishes an event to all current subscribers and the history log.
    async fn publish(&self, event: EventEnvelope) -> Result<()>;

    /// Opens a new subscription that receives events published from now on.
    fn subscribe(&self) -> EventSubscription;

    /// Retrieves published events matching a query, oldest first.
    async fn query(&self, query: EventQuery) -> Result<Vec<EventEnvelope>>;

    /// Streams every published event in publish order.
    async fn stream_all(&self) -> Result<EventStream>;
}

/// Extension trait providing convenience methods for transports.
#[async_trait]
pub trait EventTransportExt: EventTransport {
    /// Wraps a domain event in an envelope and publishes it.
    async fn emit<E>(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        event: &E,
    ) -> Result<EventEnvelope>
    where
        E: DomainEvent,
    {
        let envelope = EventEnvelope::builder()
            .event_type(event.event_type())
            .aggregate_id(aggregate_id)
            .aggregate_type(aggregate_type)
            .payload(event)?
            .build()?;
        self.publish(envelope.clone()).await?;
        Ok(envelope)
    }

    /// Returns every published event of the given type.
    async fn events_of_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>> {
        self.query(EventQuery::for_event_type(event_type)).await
    }
}

impl<T: EventTransport + ?Sized> EventTransportExt for T {}

/// A live subscription to a transport.
///
/// Backed by a bounded broadcast channel: a subscriber that falls too far
/// behind skips the overwritten events and keeps going.
#[derive(Debug)]
pub struct EventSubscription {
    receiver: broadcast::Receiver<EventEnvelope>,
}

impl EventSubscription {
    /// Wraps a broadcast receiver.
    pub fn new(receiver: broadcast::Receiver<EventEnvelope>) -> Self {
        Self { receiver }
    }

    /// Waits for the next event. Returns `None` once the transport is gone.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged, events dropped");
                    metrics::counter!("event_subscriber_lagged_total").increment(skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next already-published event without waiting.
    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged, events dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}
