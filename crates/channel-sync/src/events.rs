//! Channel and webhook events.

use chrono::{DateTime, Utc};
use common::{ChannelId, ProductId};
use event_bus::DomainEvent;
use inventory::{ConflictType, QuantityReport};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelType;
use crate::orchestrator::SyncReport;

/// Aggregate type of channel events.
pub const AGGREGATE_TYPE: &str = "Channel";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChannelEvent {
    Connected {
        channel_id: ChannelId,
        channel_type: ChannelType,
        connected_at: DateTime<Utc>,
    },
    Disconnected {
        channel_id: ChannelId,
    },
    Synced {
        report: SyncReport,
    },
    /// A connect or sync failed.
    Error {
        channel_id: ChannelId,
        operation: String,
        error: String,
    },
    /// A channel's report disagrees with other channels or, for a single
    /// reporter, with the local allocation.
    SyncDiscrepancyDetected {
        product_id: ProductId,
        channel_id: ChannelId,
        variance: u32,
        conflict_type: Option<ConflictType>,
        reports: Vec<QuantityReport>,
        local_quantity: Option<u32>,
    },
    WebhookProcessed {
        channel_id: ChannelId,
        topic: String,
        records: usize,
        conflicts: usize,
    },
    WebhookError {
        channel_id: ChannelId,
        topic: String,
        error: String,
    },
}

impl ChannelEvent {
    pub fn channel_id(&self) -> &ChannelId {
        match self {
            ChannelEvent::Connected { channel_id, .. }
            | ChannelEvent::Disconnected { channel_id }
            | ChannelEvent::Error { channel_id, .. }
            | ChannelEvent::SyncDiscrepancyDetected { channel_id, .. }
            | ChannelEvent::WebhookProcessed { channel_id, .. }
            | ChannelEvent::WebhookError { channel_id, .. } => channel_id,
            ChannelEvent::Synced { report } => &report.channel_id,
        }
    }
}

impl DomainEvent for ChannelEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ChannelEvent::Connected { .. } => "channel:connected",
            ChannelEvent::Disconnected { .. } => "channel:disconnected",
            ChannelEvent::Synced { .. } => "channel:synced",
            ChannelEvent::Error { .. } => "channel:error",
            ChannelEvent::SyncDiscrepancyDetected { .. } => "SyncDiscrepancyDetected",
            ChannelEvent::WebhookProcessed { .. } => "webhook:processed",
            ChannelEvent::WebhookError { .. } => "webhook:error",
        }
    }
}
