//! Channel adapter contract and the in-memory adapter.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AdapterError;

/// Result of a health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub details: String,
}

impl HealthStatus {
    pub fn healthy(details: impl Into<String>) -> Self {
        Self {
            healthy: true,
            details: details.into(),
        }
    }

    pub fn unhealthy(details: impl Into<String>) -> Self {
        Self {
            healthy: false,
            details: details.into(),
        }
    }
}

/// Options passed to [`ChannelAdapter::fetch_resources`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOptions {
    pub full_sync: bool,
    /// Only records changed after this instant; ignored on a full sync.
    pub since: Option<DateTime<Utc>>,
}

/// Client for one external channel API.
///
/// One implementation exists per channel type. Records are exchanged in the
/// channel's own field names; [`FieldMapping`](crate::FieldMapping) converts
/// them.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    async fn connect(&self) -> Result<(), AdapterError>;

    async fn disconnect(&self) -> Result<(), AdapterError>;

    async fn check_health(&self) -> Result<HealthStatus, AdapterError>;

    /// Fetches records of a resource type (e.g. "inventory").
    async fn fetch_resources(
        &self,
        resource: &str,
        options: &FetchOptions,
    ) -> Result<Vec<Value>, AdapterError>;

    /// Pushes records and returns how many the channel accepted.
    async fn push_resources(&self, resource: &str, records: Vec<Value>)
    -> Result<usize, AdapterError>;

    /// Registers the webhook callback URL. Adapters without webhook support
    /// keep the default no-op.
    async fn setup_webhooks(&self, _url: &str) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn remove_webhooks(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct AdapterState {
    connected: bool,
    records: HashMap<String, Vec<Value>>,
    pushed: Vec<(String, Vec<Value>)>,
    webhook_url: Option<String>,
    fetch_count: usize,
    fail_connect: bool,
    fail_fetch: bool,
    fail_push: bool,
    unhealthy: bool,
}

/// In-memory channel adapter for development and testing.
///
/// Serves seeded records, captures pushes and supports failure and latency
/// injection. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryChannelAdapter {
    state: Arc<RwLock<AdapterState>>,
    latency: Option<Duration>,
}

impl InMemoryChannelAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Replaces the records served for a resource.
    pub fn set_records(&self, resource: &str, records: Vec<Value>) {
        self.write().records.insert(resource.to_string(), records);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.write().fail_connect = fail;
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.write().fail_fetch = fail;
    }

    pub fn set_fail_push(&self, fail: bool) {
        self.write().fail_push = fail;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.write().unhealthy = !healthy;
    }

    pub fn is_connected(&self) -> bool {
        self.read().connected
    }

    /// Returns every push, oldest first.
    pub fn pushed(&self) -> Vec<(String, Vec<Value>)> {
        self.read().pushed.clone()
    }

    pub fn webhook_url(&self) -> Option<String> {
        self.read().webhook_url.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.read().fetch_count
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, AdapterState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, AdapterState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ChannelAdapter for InMemoryChannelAdapter {
    async fn connect(&self) -> Result<(), AdapterError> {
        self.delay().await;
        let mut state = self.write();
        if state.fail_connect {
            return Err(AdapterError::new("connection refused"));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        self.delay().await;
        self.write().connected = false;
        Ok(())
    }

    async fn check_health(&self) -> Result<HealthStatus, AdapterError> {
        self.delay().await;
        let state = self.read();
        Ok(match (state.connected, state.unhealthy) {
            (false, _) => HealthStatus::unhealthy("not connected"),
            (true, true) => HealthStatus::unhealthy("channel API degraded"),
            (true, false) => HealthStatus::healthy("ok"),
        })
    }

    async fn fetch_resources(
        &self,
        resource: &str,
        _options: &FetchOptions,
    ) -> Result<Vec<Value>, AdapterError> {
        self.delay().await;
        let mut state = self.write();
        state.fetch_count += 1;
        if state.fail_fetch {
            return Err(AdapterError::new(format!("failed to fetch {resource}")));
        }
        Ok(state.records.get(resource).cloned().unwrap_or_default())
    }

    async fn push_resources(
        &self,
        resource: &str,
        records: Vec<Value>,
    ) -> Result<usize, AdapterError> {
        self.delay().await;
        let mut state = self.write();
        if state.fail_push {
            return Err(AdapterError::new(format!("failed to push {resource}")));
        }
        let count = records.len();
        state.pushed.push((resource.to_string(), records));
        Ok(count)
    }

    async fn setup_webhooks(&self, url: &str) -> Result<(), AdapterError> {
        self.write().webhook_url = Some(url.to_string());
        Ok(())
    }

    async fn remove_webhooks(&self) -> Result<(), AdapterError> {
        self.write().webhook_url = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fetch_and_push() {
        let adapter = InMemoryChannelAdapter::new();
        adapter.set_records("inventory", vec![json!({"sku": "A", "quantity": 1})]);
        adapter.connect().await.unwrap();

        let records = adapter
            .fetch_resources("inventory", &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!(
            adapter
                .fetch_resources("orders", &FetchOptions::default())
                .await
                .unwrap()
                .is_empty()
        );

        let pushed = adapter.push_resources("inventory", records).await.unwrap();
        assert_eq!(pushed, 1);
        assert_eq!(adapter.pushed().len(), 1);
        assert_eq!(adapter.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_health_follows_connection() {
        let adapter = InMemoryChannelAdapter::new();
        assert!(!adapter.check_health().await.unwrap().healthy);

        adapter.connect().await.unwrap();
        assert!(adapter.check_health().await.unwrap().healthy);

        adapter.set_healthy(false);
        assert!(!adapter.check_health().await.unwrap().healthy);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let adapter = InMemoryChannelAdapter::new();
        adapter.set_fail_connect(true);
        assert!(adapter.connect().await.is_err());
        assert!(!adapter.is_connected());

        adapter.set_fail_push(true);
        assert!(adapter.push_resources("inventory", vec![]).await.is_err());
    }
}
