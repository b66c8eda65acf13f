//! Fixed-window rate limiting of channel API calls.
//!
//! Each `(channel, resource)` pair has its own window. A call increments the
//! window's count and is rejected once the count passes the limit; the first
//! call after the window elapses restarts it with a count of 1.
//!
//! Checks never block. A rejected caller backs off and retries later.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use common::ChannelId;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::SyncError;

/// Limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Calls allowed per window when no override applies.
    pub default_limit: u32,
    pub window_secs: u64,
    /// Limits per resource key (e.g. "inventory:read"), for every channel.
    pub resource_limits: HashMap<String, u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            window_secs: 60,
            resource_limits: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: Instant,
    count: u32,
}

type WindowKey = (ChannelId, String);

/// Per-channel, per-resource fixed-window counters.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    window: Duration,
    windows: Mutex<HashMap<WindowKey, Window>>,
    overrides: Mutex<HashMap<WindowKey, u32>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_window(config.window(), config)
    }

    /// Uses `window` instead of the configured whole seconds.
    pub fn with_window(window: Duration, config: RateLimitConfig) -> Self {
        Self {
            config,
            window,
            windows: Mutex::new(HashMap::new()),
            overrides: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Sets a limit for one channel and resource.
    pub fn set_limit(&self, channel_id: &ChannelId, resource: &str, limit: u32) {
        self.overrides
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((channel_id.clone(), resource.to_string()), limit);
    }

    /// Drops a channel's overrides and windows.
    pub fn clear_channel(&self, channel_id: &ChannelId) {
        self.overrides
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(channel, _), _| channel != channel_id);
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(channel, _), _| channel != channel_id);
    }

    /// Returns the limit in force for a channel and resource.
    pub fn limit_for(&self, channel_id: &ChannelId, resource: &str) -> u32 {
        let overrides = self.overrides.lock().unwrap_or_else(PoisonError::into_inner);
        overrides
            .get(&(channel_id.clone(), resource.to_string()))
            .or_else(|| self.config.resource_limits.get(resource))
            .copied()
            .unwrap_or(self.config.default_limit)
    }

    /// Counts a call and returns whether it is allowed.
    pub fn check_and_consume(&self, channel_id: &ChannelId, resource: &str) -> bool {
        self.check_and_consume_at(channel_id, resource, Instant::now())
    }

    /// [`check_and_consume`](Self::check_and_consume) at a given instant.
    pub fn check_and_consume_at(&self, channel_id: &ChannelId, resource: &str, now: Instant) -> bool {
        self.consume(channel_id, resource, now).is_ok()
    }

    /// Counts a call, failing with [`SyncError::RateLimitExceeded`] when over
    /// the limit.
    pub fn try_acquire(&self, channel_id: &ChannelId, resource: &str) -> Result<(), SyncError> {
        self.try_acquire_at(channel_id, resource, Instant::now())
    }

    pub fn try_acquire_at(
        &self,
        channel_id: &ChannelId,
        resource: &str,
        now: Instant,
    ) -> Result<(), SyncError> {
        self.consume(channel_id, resource, now)
            .map_err(|retry_after| SyncError::RateLimitExceeded {
                channel_id: channel_id.clone(),
                resource: resource.to_string(),
                retry_after,
            })
    }

    /// Returns the count of the current window, if one is open.
    pub fn current_count(&self, channel_id: &ChannelId, resource: &str) -> Option<u32> {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(channel_id.clone(), resource.to_string()))
            .map(|w| w.count)
    }

    /// Removes windows that have elapsed and returns how many were dropped.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    pub fn cleanup_at(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|_, w| now.saturating_duration_since(w.started_at) < self.window);
        before - windows.len()
    }

    /// Runs [`cleanup`](Self::cleanup) once per window until `shutdown`
    /// flips.
    pub fn spawn_cleanup(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let period = self.window.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.changed() => break,
                    _ = ticks.tick() => {
                        let evicted = self.cleanup();
                        if evicted > 0 {
                            tracing::debug!(evicted, "expired rate limit windows removed");
                        }
                    }
                }
            }

            tracing::debug!("rate limit cleanup stopped");
        })
    }

    /// Returns `Err(retry_after)` when the call is rejected.
    fn consume(&self, channel_id: &ChannelId, resource: &str, now: Instant) -> Result<(), Duration> {
        let limit = self.limit_for(channel_id, resource);
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let window = windows
            .entry((channel_id.clone(), resource.to_string()))
            .or_insert(Window {
                started_at: now,
                count: 0,
            });

        let elapsed = now.saturating_duration_since(window.started_at);
        if elapsed >= self.window {
            window.started_at = now;
            window.count = 1;
            return Ok(());
        }

        window.count = window.count.saturating_add(1);
        if window.count > limit {
            metrics::counter!("rate_limit_rejections_total").increment(1);
            tracing::debug!(
                channel_id = %channel_id,
                resource,
                count = window.count,
                limit,
                "rate limit exceeded"
            );
            return Err(self.window - elapsed);
        }
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
