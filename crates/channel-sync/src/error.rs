//! Error types for channel synchronization.

use std::time::Duration;

use common::{AggregateId, ChannelId, ProductId};
use event_bus::EventBusError;
use inventory::{AllocationError, ConflictError};
use thiserror::Error;

use crate::channel::ChannelStatus;

/// Failure reported by a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AdapterError {
    pub message: String,
}

impl AdapterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors from sync runs and channel management.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Channel not found: {0}")]
    ChannelNotFound(ChannelId),

    #[error("Channel {channel_id} is not connected (status: {status})")]
    ChannelNotConnected {
        channel_id: ChannelId,
        status: ChannelStatus,
    },

    #[error("Channel {0} is already connected")]
    ChannelAlreadyConnected(ChannelId),

    #[error("A sync is already running for channel {0}")]
    SyncInProgress(ChannelId),

    /// The caller should retry after `retry_after`.
    #[error("Rate limit exceeded for {channel_id} ({resource}), retry after {}ms", retry_after.as_millis())]
    RateLimitExceeded {
        channel_id: ChannelId,
        resource: String,
        retry_after: Duration,
    },

    #[error("Conflict for {product_id} requires manual review")]
    ConflictUnresolved { product_id: ProductId },

    #[error("Review not found: {0}")]
    ReviewNotFound(AggregateId),

    #[error("Adapter call {operation} on {channel_id} timed out after {timeout_ms}ms")]
    AdapterTimeout {
        channel_id: ChannelId,
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Adapter call {operation} on {channel_id} failed: {source}")]
    Adapter {
        channel_id: ChannelId,
        operation: &'static str,
        #[source]
        source: AdapterError,
    },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid settings for channel {channel_id}: {reason}")]
    InvalidSettings {
        channel_id: ChannelId,
        reason: String,
    },

    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationError),

    #[error("Conflict error: {0}")]
    Conflict(#[from] ConflictError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),
}

impl SyncError {
    /// Rate-limit rejections are transient and never count against the
    /// channel.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SyncError::RateLimitExceeded { .. })
    }
}

/// Errors returned to a webhook sender.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Channel not found: {0}")]
    ChannelNotFound(ChannelId),

    #[error("Webhooks are disabled for channel {0}")]
    WebhooksDisabled(ChannelId),

    #[error("Channel {channel_id} is not connected (status: {status})")]
    ChannelNotConnected {
        channel_id: ChannelId,
        status: ChannelStatus,
    },

    #[error("Webhook rate limit exceeded for {channel_id}, retry after {}ms", retry_after.as_millis())]
    RateLimited {
        channel_id: ChannelId,
        retry_after: Duration,
    },

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
