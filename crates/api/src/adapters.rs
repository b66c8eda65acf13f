//! Adapter construction for newly connected channels.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use channel_sync::{ChannelAdapter, ChannelType, InMemoryChannelAdapter};
use common::ChannelId;

/// Creates the adapter a channel connects through.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, channel_id: &ChannelId, channel_type: &ChannelType) -> Arc<dyn ChannelAdapter>;
}

/// Hands out one in-memory adapter per channel id, for local runs and tests.
///
/// Reconnecting a channel reuses its adapter, so seeded records survive.
#[derive(Debug, Default)]
pub struct InMemoryAdapterFactory {
    adapters: Mutex<HashMap<ChannelId, InMemoryChannelAdapter>>,
}

impl InMemoryAdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the channel's adapter, creating it if needed.
    pub fn adapter(&self, channel_id: &ChannelId) -> InMemoryChannelAdapter {
        self.adapters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel_id.clone())
            .or_default()
            .clone()
    }
}

impl AdapterFactory for InMemoryAdapterFactory {
    fn create(&self, channel_id: &ChannelId, channel_type: &ChannelType) -> Arc<dyn ChannelAdapter> {
        tracing::debug!(channel_id = %channel_id, channel_type = %channel_type, "using in-memory adapter");
        Arc::new(self.adapter(channel_id))
    }
}
