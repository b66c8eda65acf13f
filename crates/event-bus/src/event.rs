use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::error::{EventBusError, Result};

/// Identifies a published event. Consumers use it to skip redeliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fact published on the transport.
///
/// Names are past tense, except the channel lifecycle topics which use
/// `noun:verb` (`channel:connected`, `channel:synced`).
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name carried as `event_type` in the envelope.
    fn event_type(&self) -> &'static str;
}

/// The unit published on the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,
    /// e.g. "InventoryAllocated" or "channel:synced".
    pub event_type: String,
    /// Product id, channel id, order id or saga id.
    pub aggregate_id: String,
    /// "Product", "Channel", "Order" or "Saga".
    pub aggregate_type: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelope {
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// Decodes the payload into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Builder for [`EventEnvelope`]. The id and timestamp are assigned on build.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_type: Option<String>,
    aggregate_id: Option<String>,
    aggregate_type: Option<String>,
    payload: Option<serde_json::Value>,
    metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelopeBuilder {
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn aggregate_id(mut self, id: impl Into<String>) -> Self {
        self.aggregate_id = Some(id.into());
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    pub fn payload<T: Serialize>(mut self, payload: &T) -> std::result::Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Fails with [`EventBusError::InvalidEnvelope`] naming the first missing
    /// field.
    pub fn build(self) -> Result<EventEnvelope> {
        let missing = |field: &str| EventBusError::InvalidEnvelope(format!("{field} is required"));
        Ok(EventEnvelope {
            event_id: EventId::new(),
            event_type: self.event_type.ok_or_else(|| missing("event_type"))?,
            aggregate_id: self.aggregate_id.ok_or_else(|| missing("aggregate_id"))?,
            aggregate_type: self.aggregate_type.ok_or_else(|| missing("aggregate_type"))?,
            timestamp: Utc::now(),
            payload: self.payload.ok_or_else(|| missing("payload"))?,
            metadata: self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_new_creates_unique_ids() {
        let id1 = EventId::new();
        let id2 = EventId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn event_envelope_builder() {
        let payload = serde_json::json!({"quantity": 5});

        let envelope = EventEnvelope::builder()
            .event_type("InventoryAllocated")
            .aggregate_id("SKU-001")
            .aggregate_type("Product")
            .payload_raw(payload.clone())
            .metadata("correlation_id", serde_json::json!("123"))
            .build()
            .unwrap();

        assert_eq!(envelope.event_type, "InventoryAllocated");
        assert_eq!(envelope.aggregate_id, "SKU-001");
        assert_eq!(envelope.aggregate_type, "Product");
        assert_eq!(envelope.payload, payload);
        assert_eq!(
            envelope.metadata.get("correlation_id"),
            Some(&serde_json::json!("123"))
        );
    }

    #[test]
    fn event_envelope_build_reports_missing_field() {
        let result = EventEnvelope::builder()
            .event_type("InventoryAllocated")
            .aggregate_type("Product")
            .payload_raw(serde_json::json!({}))
            .build();

        match result {
            Err(EventBusError::InvalidEnvelope(msg)) => assert!(msg.contains("aggregate_id")),
            other => panic!("expected InvalidEnvelope, got {other:?}"),
        }
    }

    #[test]
    fn decode_typed_payload() {
        #[derive(Deserialize)]
        struct Payload {
            quantity: u32,
        }

        let envelope = EventEnvelope::builder()
            .event_type("InventoryAllocated")
            .aggregate_id("SKU-001")
            .aggregate_type("Product")
            .payload_raw(serde_json::json!({"quantity": 7}))
            .build()
            .unwrap();

        let payload: Payload = envelope.decode().unwrap();
        assert_eq!(payload.quantity, 7);
    }
}
