//! Channel model.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::ChannelId;
use inventory::ResolutionStrategy;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::mapping::FieldMapping;

/// Kind of external sales channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Shopify,
    Amazon,
    Ebay,
    Etsy,
    Pos,
    Custom(String),
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelType::Shopify => write!(f, "shopify"),
            ChannelType::Amazon => write!(f, "amazon"),
            ChannelType::Ebay => write!(f, "ebay"),
            ChannelType::Etsy => write!(f, "etsy"),
            ChannelType::Pos => write!(f, "pos"),
            ChannelType::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// Connection status of a channel.
///
/// ```text
/// Disconnected -> Connecting -> Connected <-> Syncing
///                      |            ^            |
///                      v            |            v
///                    Error ---------+--------- Error
/// ```
///
/// A channel in `Error` after a failed sync is still connected and returns to
/// `Connected` on its next successful sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Syncing,
    Error,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Disconnected => "disconnected",
            ChannelStatus::Connecting => "connecting",
            ChannelStatus::Connected => "connected",
            ChannelStatus::Syncing => "syncing",
            ChannelStatus::Error => "error",
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Seconds between scheduled syncs.
    pub sync_interval_secs: u64,
    pub sync_enabled: bool,
    pub webhooks_enabled: bool,
    pub field_mapping: FieldMapping,
    /// Resources synced when a run names none.
    pub resources: Vec<String>,
    /// Per-resource rate limits overriding the limiter default.
    pub rate_limits: HashMap<String, u32>,
    /// Conflict strategy for this channel; the resolver default when unset.
    pub conflict_strategy: Option<ResolutionStrategy>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            sync_interval_secs: 300,
            sync_enabled: true,
            webhooks_enabled: false,
            field_mapping: FieldMapping::default(),
            resources: vec!["inventory".to_string()],
            rate_limits: HashMap::new(),
            conflict_strategy: None,
        }
    }
}

impl ChannelSettings {
    /// Rejects settings a channel cannot run with.
    pub fn validate(&self, channel_id: &ChannelId) -> Result<(), SyncError> {
        if self.sync_interval_secs == 0 {
            return Err(SyncError::InvalidSettings {
                channel_id: channel_id.clone(),
                reason: "sync_interval_secs must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn with_webhooks(mut self, enabled: bool) -> Self {
        self.webhooks_enabled = enabled;
        self
    }

    pub fn with_sync_enabled(mut self, enabled: bool) -> Self {
        self.sync_enabled = enabled;
        self
    }

    pub fn with_field_mapping(mut self, mapping: FieldMapping) -> Self {
        self.field_mapping = mapping;
        self
    }

    pub fn with_rate_limit(mut self, resource: impl Into<String>, limit: u32) -> Self {
        self.rate_limits.insert(resource.into(), limit);
        self
    }

    pub fn with_conflict_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.conflict_strategy = Some(strategy);
        self
    }
}

/// Running counters for a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMetrics {
    pub sync_count: u64,
    pub error_count: u64,
    pub conflict_count: u64,
}

/// A registered sales channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub channel_type: ChannelType,
    pub status: ChannelStatus,
    pub settings: ChannelSettings,
    pub metrics: ChannelMetrics,
    /// Set while the adapter holds an open connection.
    pub connected_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Channel {
    pub fn new(id: ChannelId, channel_type: ChannelType, settings: ChannelSettings) -> Self {
        Self {
            id,
            channel_type,
            status: ChannelStatus::Disconnected,
            settings,
            metrics: ChannelMetrics::default(),
            connected_at: None,
            last_sync_at: None,
            last_error: None,
        }
    }

    /// Returns true if a sync may start: the channel is connected, or it is
    /// in `Error` after a failed sync on an open connection.
    pub fn can_sync(&self) -> bool {
        match self.status {
            ChannelStatus::Connected => true,
            ChannelStatus::Error => self.connected_at.is_some(),
            _ => false,
        }
    }

    /// Returns true if the scheduler should run this channel.
    pub fn is_schedulable(&self) -> bool {
        self.settings.sync_enabled && self.connected_at.is_some()
    }
}
