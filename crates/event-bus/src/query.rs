use chrono::{DateTime, Utc};

use crate::EventEnvelope;

/// Filter over the published event log, in publish order.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub aggregate_id: Option<String>,
    /// Any of these event types.
    pub event_types: Option<Vec<String>>,
    /// Only events stamped at or after this instant.
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl EventQuery {
    /// Everything published about one product, channel, order or saga.
    pub fn for_aggregate(aggregate_id: impl Into<String>) -> Self {
        Self {
            aggregate_id: Some(aggregate_id.into()),
            ..Default::default()
        }
    }

    pub fn for_event_type(event_type: impl Into<String>) -> Self {
        Self::default().event_type(event_type)
    }

    /// Adds an accepted event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types
            .get_or_insert_with(Vec::new)
            .push(event_type.into());
        self
    }

    pub fn since(mut self, timestamp: DateTime<Utc>) -> Self {
        self.since = Some(timestamp);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Applies the filters. Paging is left to the caller.
    pub fn matches(&self, event: &EventEnvelope) -> bool {
        let aggregate_ok = self
            .aggregate_id
            .as_ref()
            .is_none_or(|id| &event.aggregate_id == id);
        let type_ok = self
            .event_types
            .as_ref()
            .is_none_or(|types| types.contains(&event.event_type));
        let time_ok = self.since.is_none_or(|since| event.timestamp >= since);
        aggregate_ok && type_ok && time_ok
    }
}
