//! Periodic channel syncs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use common::ChannelId;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{Result, SyncError};
use crate::orchestrator::{SyncDirection, SyncOptions, SyncOrchestrator};

struct ScheduledTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Runs a background sync task per channel at the channel's sync interval.
///
/// Scheduled runs go through [`SyncOrchestrator::sync_channel`], so a tick
/// that lands while a manual sync is running is skipped.
pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    tasks: Mutex<HashMap<ChannelId, ScheduledTask>>,
}

impl SyncScheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self {
            orchestrator,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Starts (or restarts) the periodic sync of a channel. The first run
    /// happens one interval from now.
    pub fn schedule(&self, channel_id: &ChannelId) -> Result<()> {
        let channel = self
            .orchestrator
            .channel(channel_id)
            .ok_or_else(|| SyncError::ChannelNotFound(channel_id.clone()))?;
        channel.settings.validate(channel_id)?;
        let period = channel.settings.sync_interval();

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let orchestrator = self.orchestrator.clone();
        let id = channel_id.clone();

        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => break,
                    _ = ticks.tick() => {
                        let options = SyncOptions::new(SyncDirection::Both);
                        match orchestrator.sync_channel(&id, options).await {
                            Ok(_) => {}
                            Err(SyncError::SyncInProgress(_)) => {
                                tracing::debug!(channel_id = %id, "sync already running, skipping tick");
                            }
                            Err(e) => {
                                tracing::warn!(channel_id = %id, error = %e, "scheduled sync failed");
                            }
                        }
                    }
                }
            }

            tracing::debug!(channel_id = %id, "sync schedule stopped");
        });

        let previous = self
            .lock()
            .insert(channel_id.clone(), ScheduledTask { shutdown, handle });
        if let Some(previous) = previous {
            let _ = previous.shutdown.send(true);
        }

        tracing::info!(channel_id = %channel_id, interval_secs = period.as_secs(), "sync scheduled");
        Ok(())
    }

    /// Stops a channel's periodic sync. Returns false if none was scheduled.
    pub fn unschedule(&self, channel_id: &ChannelId) -> bool {
        match self.lock().remove(channel_id) {
            Some(task) => {
                let _ = task.shutdown.send(true);
                true
            }
            None => false,
        }
    }

    /// Schedules every connected channel with syncing enabled and returns
    /// how many were scheduled.
    pub fn start(&self) -> usize {
        let mut scheduled = 0;
        for channel in self.orchestrator.channels() {
            if !channel.is_schedulable() {
                continue;
            }
            match self.schedule(&channel.id) {
                Ok(()) => scheduled += 1,
                Err(e) => tracing::warn!(channel_id = %channel.id, error = %e, "failed to schedule channel"),
            }
        }
        scheduled
    }

    /// Stops every task and waits for in-flight runs to finish.
    pub async fn stop(&self) {
        let tasks: Vec<ScheduledTask> = self.lock().drain().map(|(_, task)| task).collect();
        for task in &tasks {
            let _ = task.shutdown.send(true);
        }
        for task in tasks {
            if let Err(e) = task.handle.await {
                tracing::error!(error = %e, "sync task panicked");
            }
        }
    }

    /// Channels with a running schedule, ordered by id.
    pub fn scheduled(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ChannelId, ScheduledTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        for task in self.lock().values() {
            let _ = task.shutdown.send(true);
        }
    }
}
