//! Channel registry and sync runs.
//!
//! The orchestrator owns every connected channel and its adapter. A sync run
//! fetches channel records (inbound), reconciles them against other channels
//! and the local allocations, and pushes local allocations back (outbound).
//! Runs for one channel never overlap; manual and scheduled runs share the
//! same guard.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::{AggregateId, ChannelId, KeyedLocks, ProductId};
use event_bus::{EventTransport, EventTransportExt};
use inventory::{
    AllocationEngine, ConflictDetection, ConflictReport, ConflictResolver, Resolution,
    ResolutionStrategy,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapter::{ChannelAdapter, FetchOptions, HealthStatus};
use crate::channel::{Channel, ChannelSettings, ChannelStatus, ChannelType};
use crate::error::{AdapterError, Result, SyncError, WebhookError};
use crate::events::{AGGREGATE_TYPE, ChannelEvent};
use crate::mapping::{ChannelRecord, FieldMapping};
use crate::rate_limit::RateLimiter;
use crate::reports::ReportBook;
use crate::review::ReviewQueue;

/// Event type of an externally requested manual sync.
pub const SYNC_REQUESTED: &str = "ChannelSyncRequested";

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound on every adapter call.
    pub adapter_timeout_ms: u64,
    /// Public base URL; webhooks are registered at
    /// `{base}/channels/{channel_id}/webhook`.
    pub webhook_base_url: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_ms: 30_000,
            webhook_base_url: None,
        }
    }
}

impl SyncConfig {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_webhook_base_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_base_url = Some(url.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// Channel to local.
    #[default]
    Inbound,
    /// Local to channel.
    Outbound,
    /// Inbound, then outbound.
    Both,
}

impl SyncDirection {
    pub fn includes_inbound(self) -> bool {
        matches!(self, SyncDirection::Inbound | SyncDirection::Both)
    }

    pub fn includes_outbound(self) -> bool {
        matches!(self, SyncDirection::Outbound | SyncDirection::Both)
    }
}

/// Options of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Fetch everything instead of changes since the last sync.
    pub full_sync: bool,
    /// Resources to sync; the channel's configured resources when empty.
    pub resources: Vec<String>,
    pub direction: SyncDirection,
}

impl SyncOptions {
    pub fn new(direction: SyncDirection) -> Self {
        Self {
            direction,
            ..Self::default()
        }
    }

    pub fn full(mut self) -> Self {
        self.full_sync = true;
        self
    }

    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources = resources.into_iter().map(Into::into).collect();
        self
    }
}

/// Payload of a `ChannelSyncRequested` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub channel_id: ChannelId,
    #[serde(flatten)]
    pub options: SyncOptions,
}

/// A detected cross-channel conflict and what was done about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictOutcome {
    pub product_id: ProductId,
    pub detection: ConflictDetection,
    pub resolution: Resolution,
    /// Channels whose report differed from the applied quantity.
    pub losing_channels: Vec<ChannelId>,
    /// Set when the conflict was queued for manual review.
    pub review_id: Option<AggregateId>,
}

/// What reconciling one record produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RecordOutcome {
    pub conflict: Option<ConflictOutcome>,
    /// Set when a single reporter disagreed with the local allocation.
    pub discrepancy: Option<ProductId>,
}

/// Summary of a completed sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub channel_id: ChannelId,
    pub direction: SyncDirection,
    pub full_sync: bool,
    pub resources: Vec<String>,
    pub records_fetched: usize,
    pub records_applied: usize,
    /// Records that could not be mapped.
    pub records_skipped: usize,
    pub records_pushed: usize,
    pub conflicts: Vec<ConflictOutcome>,
    pub discrepancies: Vec<ProductId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    fn new(channel_id: ChannelId, options: &SyncOptions, resources: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            channel_id,
            direction: options.direction,
            full_sync: options.full_sync,
            resources,
            records_fetched: 0,
            records_applied: 0,
            records_skipped: 0,
            records_pushed: 0,
            conflicts: Vec::new(),
            discrepancies: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    fn absorb(&mut self, outcome: RecordOutcome) {
        self.conflicts.extend(outcome.conflict);
        self.discrepancies.extend(outcome.discrepancy);
    }
}

/// What a webhook for a channel is processed with.
pub(crate) struct WebhookTarget {
    pub mapping: FieldMapping,
    pub strategy: Option<ResolutionStrategy>,
}

struct ChannelEntry {
    channel: Channel,
    adapter: Arc<dyn ChannelAdapter>,
    /// Products whose channel quantity should be overwritten by the local
    /// allocation on the next outbound sync.
    pending_corrections: BTreeSet<ProductId>,
}

/// Runs channel syncs and owns the channel registry.
pub struct SyncOrchestrator {
    engine: Arc<AllocationEngine>,
    transport: Arc<dyn EventTransport>,
    resolver: ConflictResolver,
    limiter: Arc<RateLimiter>,
    config: SyncConfig,
    channels: RwLock<HashMap<ChannelId, ChannelEntry>>,
    running: KeyedLocks<ChannelId>,
    reports: ReportBook,
    reviews: ReviewQueue,
}

impl SyncOrchestrator {
    pub fn new(engine: Arc<AllocationEngine>, transport: Arc<dyn EventTransport>) -> Self {
        Self {
            engine,
            transport,
            resolver: ConflictResolver::default(),
            limiter: Arc::new(RateLimiter::default()),
            config: SyncConfig::default(),
            channels: RwLock::new(HashMap::new()),
            running: KeyedLocks::new(),
            reports: ReportBook::new(),
            reviews: ReviewQueue::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn engine(&self) -> &Arc<AllocationEngine> {
        &self.engine
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    pub fn reviews(&self) -> &ReviewQueue {
        &self.reviews
    }

    pub fn reports(&self) -> &ReportBook {
        &self.reports
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ---- channel lifecycle ----

    /// Registers a channel and opens its adapter connection.
    ///
    /// A channel seen before keeps its metrics and sync history. On failure
    /// the channel is left in `Error` without a connection.
    #[tracing::instrument(skip(self, settings, adapter), fields(channel_id = %channel_id, channel_type = %channel_type))]
    pub async fn connect_channel(
        &self,
        channel_id: ChannelId,
        channel_type: ChannelType,
        settings: ChannelSettings,
        adapter: Arc<dyn ChannelAdapter>,
    ) -> Result<Channel> {
        settings.validate(&channel_id)?;
        let _guard = self.running.lock(&channel_id).await;

        {
            let mut channels = self.write();
            if let Some(existing) = channels.get(&channel_id) {
                if existing.channel.connected_at.is_some() {
                    return Err(SyncError::ChannelAlreadyConnected(channel_id));
                }
            }
            let mut channel = match channels.remove(&channel_id) {
                Some(previous) => Channel {
                    channel_type: channel_type.clone(),
                    settings: settings.clone(),
                    ..previous.channel
                },
                None => Channel::new(channel_id.clone(), channel_type.clone(), settings.clone()),
            };
            channel.status = ChannelStatus::Connecting;
            channels.insert(
                channel_id.clone(),
                ChannelEntry {
                    channel,
                    adapter: adapter.clone(),
                    pending_corrections: BTreeSet::new(),
                },
            );
        }

        if let Err(e) = self.call(&channel_id, "connect", adapter.connect()).await {
            self.update(&channel_id, |entry| {
                entry.channel.status = ChannelStatus::Error;
                entry.channel.metrics.error_count += 1;
                entry.channel.last_error = Some(e.to_string());
            });
            tracing::warn!(error = %e, "channel connection failed");
            self.publish(ChannelEvent::Error {
                channel_id: channel_id.clone(),
                operation: "connect".to_string(),
                error: e.to_string(),
            })
            .await;
            return Err(e);
        }

        for (resource, limit) in &settings.rate_limits {
            self.limiter.set_limit(&channel_id, resource, *limit);
        }

        if settings.webhooks_enabled {
            if let Some(url) = self.webhook_url(&channel_id) {
                if let Err(e) = self
                    .call(&channel_id, "setup_webhooks", adapter.setup_webhooks(&url))
                    .await
                {
                    tracing::warn!(error = %e, url, "webhook registration failed");
                }
            }
        }

        let connected_at = Utc::now();
        let channel = self
            .update(&channel_id, |entry| {
                entry.channel.status = ChannelStatus::Connected;
                entry.channel.connected_at = Some(connected_at);
                entry.channel.last_error = None;
            })
            .ok_or_else(|| SyncError::ChannelNotFound(channel_id.clone()))?;

        tracing::info!("channel connected");
        self.publish(ChannelEvent::Connected {
            channel_id,
            channel_type,
            connected_at,
        })
        .await;

        Ok(channel)
    }

    /// Closes a channel's connection. The channel stays registered.
    #[tracing::instrument(skip(self), fields(channel_id = %channel_id))]
    pub async fn disconnect_channel(&self, channel_id: &ChannelId) -> Result<Channel> {
        let _guard = self.running.lock(channel_id).await;
        let (adapter, webhooks_enabled) = {
            let channels = self.read();
            let entry = channels
                .get(channel_id)
                .ok_or_else(|| SyncError::ChannelNotFound(channel_id.clone()))?;
            (entry.adapter.clone(), entry.channel.settings.webhooks_enabled)
        };

        if webhooks_enabled {
            if let Err(e) = self
                .call(channel_id, "remove_webhooks", adapter.remove_webhooks())
                .await
            {
                tracing::warn!(error = %e, "webhook removal failed");
            }
        }
        if let Err(e) = self.call(channel_id, "disconnect", adapter.disconnect()).await {
            tracing::warn!(error = %e, "adapter disconnect failed");
        }

        self.limiter.clear_channel(channel_id);
        self.reports.forget_channel(channel_id);
        let channel = self
            .update(channel_id, |entry| {
                entry.channel.status = ChannelStatus::Disconnected;
                entry.channel.connected_at = None;
                entry.pending_corrections.clear();
            })
            .ok_or_else(|| SyncError::ChannelNotFound(channel_id.clone()))?;

        tracing::info!("channel disconnected");
        self.publish(ChannelEvent::Disconnected {
            channel_id: channel_id.clone(),
        })
        .await;

        Ok(channel)
    }

    /// Probes the channel API.
    pub async fn check_channel_health(&self, channel_id: &ChannelId) -> Result<HealthStatus> {
        let adapter = self.adapter(channel_id)?;
        self.call(channel_id, "check_health", adapter.check_health())
            .await
    }

    pub fn channel(&self, channel_id: &ChannelId) -> Option<Channel> {
        self.read().get(channel_id).map(|e| e.channel.clone())
    }

    /// Returns every registered channel, ordered by id.
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.read().values().map(|e| e.channel.clone()).collect();
        channels.sort_by(|a, b| a.id.cmp(&b.id));
        channels
    }

    /// Products waiting for an outbound correction on a channel.
    pub fn pending_corrections(&self, channel_id: &ChannelId) -> Vec<ProductId> {
        self.read()
            .get(channel_id)
            .map(|e| e.pending_corrections.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns true if a sync (or connect/disconnect) holds the channel.
    pub fn is_syncing(&self, channel_id: &ChannelId) -> bool {
        self.running.is_locked(channel_id)
    }

    // ---- sync ----

    /// Runs one sync for a channel.
    ///
    /// Fails fast with [`SyncError::SyncInProgress`] if a run for the channel
    /// is already executing. A rate-limit rejection ends the run without
    /// counting as a channel error; any other failure moves the channel to
    /// `Error`. Failed runs are not retried here.
    #[tracing::instrument(skip(self, options), fields(channel_id = %channel_id, direction = ?options.direction))]
    pub async fn sync_channel(&self, channel_id: &ChannelId, options: SyncOptions) -> Result<SyncReport> {
        let Some(_guard) = self.running.try_lock(channel_id) else {
            return Err(SyncError::SyncInProgress(channel_id.clone()));
        };

        let (channel, adapter) = {
            let mut channels = self.write();
            let entry = channels
                .get_mut(channel_id)
                .ok_or_else(|| SyncError::ChannelNotFound(channel_id.clone()))?;
            if !entry.channel.can_sync() {
                return Err(SyncError::ChannelNotConnected {
                    channel_id: channel_id.clone(),
                    status: entry.channel.status,
                });
            }
            let snapshot = entry.channel.clone();
            entry.channel.status = ChannelStatus::Syncing;
            (snapshot, entry.adapter.clone())
        };

        metrics::counter!("sync_runs_total").increment(1);
        let started = Instant::now();
        let result = self.run_sync(&channel, adapter.as_ref(), &options).await;
        metrics::histogram!("sync_duration_seconds").record(started.elapsed().as_secs_f64());

        match result {
            Ok(report) => {
                self.update(channel_id, |entry| {
                    entry.channel.status = ChannelStatus::Connected;
                    entry.channel.last_sync_at = Some(report.finished_at);
                    entry.channel.metrics.sync_count += 1;
                    entry.channel.last_error = None;
                });
                tracing::info!(
                    fetched = report.records_fetched,
                    applied = report.records_applied,
                    pushed = report.records_pushed,
                    conflicts = report.conflicts.len(),
                    "channel synced"
                );
                self.publish(ChannelEvent::Synced {
                    report: report.clone(),
                })
                .await;
                Ok(report)
            }
            Err(e) if e.is_rate_limited() => {
                self.update(channel_id, |entry| entry.channel.status = channel.status);
                tracing::warn!(error = %e, "sync rate limited");
                Err(e)
            }
            Err(e) => {
                self.update(channel_id, |entry| {
                    entry.channel.status = ChannelStatus::Error;
                    entry.channel.metrics.error_count += 1;
                    entry.channel.last_error = Some(e.to_string());
                });
                metrics::counter!("sync_failures_total").increment(1);
                tracing::error!(error = %e, "channel sync failed");
                self.publish(ChannelEvent::Error {
                    channel_id: channel_id.clone(),
                    operation: "sync".to_string(),
                    error: e.to_string(),
                })
                .await;
                Err(e)
            }
        }
    }

    async fn run_sync(
        &self,
        channel: &Channel,
        adapter: &dyn ChannelAdapter,
        options: &SyncOptions,
    ) -> Result<SyncReport> {
        let channel_id = &channel.id;
        let settings = &channel.settings;
        let resources = if options.resources.is_empty() {
            settings.resources.clone()
        } else {
            options.resources.clone()
        };
        let mut report = SyncReport::new(channel_id.clone(), options, resources.clone());

        if options.direction.includes_inbound() {
            let fetch = FetchOptions {
                full_sync: options.full_sync,
                since: if options.full_sync {
                    None
                } else {
                    channel.last_sync_at
                },
            };
            for resource in &resources {
                self.limiter
                    .try_acquire(channel_id, &format!("{resource}:read"))?;
                let records = self
                    .call(channel_id, "fetch_resources", adapter.fetch_resources(resource, &fetch))
                    .await?;
                report.records_fetched += records.len();

                for value in &records {
                    let record = match settings.field_mapping.map_record(value) {
                        Ok(record) => record,
                        Err(e) => {
                            tracing::warn!(error = %e, resource, "skipping unmappable record");
                            report.records_skipped += 1;
                            continue;
                        }
                    };
                    let outcome = self
                        .reconcile_record(channel_id, &record, settings.conflict_strategy)
                        .await?;
                    report.records_applied += 1;
                    report.absorb(outcome);
                }
            }
        }

        if options.direction.includes_outbound() {
            let records: Vec<Value> = self
                .engine
                .allocations_for_channel(channel_id)
                .into_iter()
                .map(|allocation| {
                    settings.field_mapping.to_external(&ChannelRecord {
                        product_id: allocation.product_id,
                        quantity: allocation.allocated_quantity,
                        updated_at: Some(allocation.updated_at),
                    })
                })
                .collect();

            if !records.is_empty() {
                for resource in &resources {
                    self.limiter
                        .try_acquire(channel_id, &format!("{resource}:write"))?;
                    report.records_pushed += self
                        .call(
                            channel_id,
                            "push_resources",
                            adapter.push_resources(resource, records.clone()),
                        )
                        .await?;
                }
            }
            self.update(channel_id, |entry| entry.pending_corrections.clear());
        }

        report.finished_at = Utc::now();
        Ok(report)
    }

    /// Reconciles one mapped record from a channel.
    ///
    /// With two or more reporters a conflict is resolved with `strategy` (or
    /// the resolver default) and the result is applied to every reporting
    /// channel; `manual` queues the conflict for review. A lone reporter
    /// that disagrees with its local allocation is recorded as a
    /// discrepancy and marked for outbound correction.
    pub(crate) async fn reconcile_record(
        &self,
        channel_id: &ChannelId,
        record: &ChannelRecord,
        strategy: Option<ResolutionStrategy>,
    ) -> Result<RecordOutcome> {
        let product_id = &record.product_id;
        let reported_at = record.updated_at.unwrap_or_else(Utc::now);
        self.reports
            .record(product_id, channel_id, record.quantity, reported_at);
        let report = self.reports.report_for(product_id);

        if report.reports.len() < 2 {
            let local = self
                .engine
                .get_allocation(channel_id, product_id)
                .map(|a| a.allocated_quantity);
            let local_quantity = local.unwrap_or(0);
            if local_quantity == record.quantity {
                return Ok(RecordOutcome::default());
            }

            self.mark_corrections(product_id, std::slice::from_ref(channel_id));
            self.publish(ChannelEvent::SyncDiscrepancyDetected {
                product_id: product_id.clone(),
                channel_id: channel_id.clone(),
                variance: local_quantity.abs_diff(record.quantity),
                conflict_type: None,
                reports: report.reports,
                local_quantity: local,
            })
            .await;
            return Ok(RecordOutcome {
                conflict: None,
                discrepancy: Some(product_id.clone()),
            });
        }

        let detection = self.resolver.detect(&report);
        if !detection.has_conflict {
            return Ok(RecordOutcome::default());
        }

        metrics::counter!("sync_conflicts_total").increment(1);
        self.update(channel_id, |entry| entry.channel.metrics.conflict_count += 1);
        tracing::info!(
            product_id = %product_id,
            variance = detection.variance,
            conflict_type = detection.conflict_type.as_str(),
            "conflict detected"
        );
        self.publish(ChannelEvent::SyncDiscrepancyDetected {
            product_id: product_id.clone(),
            channel_id: channel_id.clone(),
            variance: detection.variance,
            conflict_type: Some(detection.conflict_type),
            reports: report.reports.clone(),
            local_quantity: None,
        })
        .await;

        let strategy = strategy.unwrap_or(self.resolver.config().default_strategy);
        let resolution = self.resolver.resolve(&report, strategy)?;
        let outcome = match resolution.quantity() {
            Some(quantity) => {
                let losing_channels = self.apply_resolution(&report, quantity).await?;
                ConflictOutcome {
                    product_id: product_id.clone(),
                    detection,
                    resolution,
                    losing_channels,
                    review_id: None,
                }
            }
            None => {
                let review_id = self.reviews.push(report, detection, channel_id.clone());
                tracing::warn!(product_id = %product_id, %review_id, "conflict queued for manual review");
                ConflictOutcome {
                    product_id: product_id.clone(),
                    detection,
                    resolution,
                    losing_channels: Vec::new(),
                    review_id: Some(review_id),
                }
            }
        };

        Ok(RecordOutcome {
            conflict: Some(outcome),
            discrepancy: None,
        })
    }

    /// Resolves the known reports for a product with `strategy` and applies
    /// the result. `manual` fails with [`SyncError::ConflictUnresolved`].
    #[tracing::instrument(skip(self), fields(product_id = %product_id, strategy = %strategy))]
    pub async fn resolve_conflict(
        &self,
        product_id: &ProductId,
        strategy: ResolutionStrategy,
    ) -> Result<ConflictOutcome> {
        let report = self.reports.report_for(product_id);
        let detection = self.resolver.detect(&report);
        let resolution = self.resolver.resolve(&report, strategy)?;
        let Some(quantity) = resolution.quantity() else {
            return Err(SyncError::ConflictUnresolved {
                product_id: product_id.clone(),
            });
        };

        let losing_channels = self.apply_resolution(&report, quantity).await?;
        Ok(ConflictOutcome {
            product_id: product_id.clone(),
            detection,
            resolution,
            losing_channels,
            review_id: None,
        })
    }

    /// Applies a reviewer's quantity to a queued conflict.
    #[tracing::instrument(skip(self), fields(%review_id))]
    pub async fn resolve_review(&self, review_id: AggregateId, quantity: u32) -> Result<ConflictOutcome> {
        let review = self
            .reviews
            .take(review_id)
            .ok_or(SyncError::ReviewNotFound(review_id))?;

        let losing_channels = self.apply_resolution(&review.report, quantity).await?;
        tracing::info!(product_id = %review.report.product_id, quantity, "manual review applied");
        Ok(ConflictOutcome {
            product_id: review.report.product_id.clone(),
            detection: review.detection,
            resolution: Resolution::Resolved {
                quantity,
                strategy: ResolutionStrategy::Manual,
                source_channel: None,
            },
            losing_channels,
            review_id: Some(review_id),
        })
    }

    /// Sets every reporter's allocation to `quantity` and returns the
    /// channels that reported something else.
    async fn apply_resolution(&self, report: &ConflictReport, quantity: u32) -> Result<Vec<ChannelId>> {
        let product_id = &report.product_id;
        for entry in &report.reports {
            self.engine
                .apply_target(product_id, &entry.channel_id, quantity)
                .await?;
        }
        self.reports.settle(product_id, quantity, Utc::now());

        let losing: Vec<ChannelId> = report
            .reports
            .iter()
            .filter(|r| r.quantity != quantity)
            .map(|r| r.channel_id.clone())
            .collect();
        self.mark_corrections(product_id, &losing);
        Ok(losing)
    }

    // ---- webhook support ----

    /// Checks that a channel accepts webhooks right now.
    pub(crate) fn webhook_target(&self, channel_id: &ChannelId) -> std::result::Result<WebhookTarget, WebhookError> {
        let channels = self.read();
        let entry = channels
            .get(channel_id)
            .ok_or_else(|| WebhookError::ChannelNotFound(channel_id.clone()))?;
        let channel = &entry.channel;
        if !channel.settings.webhooks_enabled {
            return Err(WebhookError::WebhooksDisabled(channel_id.clone()));
        }
        if channel.connected_at.is_none() {
            return Err(WebhookError::ChannelNotConnected {
                channel_id: channel_id.clone(),
                status: channel.status,
            });
        }
        Ok(WebhookTarget {
            mapping: channel.settings.field_mapping.clone(),
            strategy: channel.settings.conflict_strategy,
        })
    }

    pub(crate) async fn publish(&self, event: ChannelEvent) {
        let aggregate_id = event.channel_id().to_string();
        if let Err(e) = self
            .transport
            .emit(&aggregate_id, AGGREGATE_TYPE, &event)
            .await
        {
            tracing::error!(error = %e, "failed to publish channel event");
            metrics::counter!("event_publish_failures_total").increment(1);
        }
    }

    // ---- helpers ----

    fn webhook_url(&self, channel_id: &ChannelId) -> Option<String> {
        self.config
            .webhook_base_url
            .as_deref()
            .map(|base| format!("{}/channels/{channel_id}/webhook", base.trim_end_matches('/')))
    }

    fn adapter(&self, channel_id: &ChannelId) -> Result<Arc<dyn ChannelAdapter>> {
        self.read()
            .get(channel_id)
            .map(|e| e.adapter.clone())
            .ok_or_else(|| SyncError::ChannelNotFound(channel_id.clone()))
    }

    fn mark_corrections(&self, product_id: &ProductId, channel_ids: &[ChannelId]) {
        let mut channels = self.write();
        for channel_id in channel_ids {
            if let Some(entry) = channels.get_mut(channel_id) {
                entry.pending_corrections.insert(product_id.clone());
            }
        }
    }

    /// Runs an adapter call under the configured timeout.
    async fn call<T, F>(&self, channel_id: &ChannelId, operation: &'static str, future: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, AdapterError>>,
    {
        let timeout = self.config.adapter_timeout();
        match tokio::time::timeout(timeout, future).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(SyncError::Adapter {
                channel_id: channel_id.clone(),
                operation,
                source,
            }),
            Err(_) => Err(SyncError::AdapterTimeout {
                channel_id: channel_id.clone(),
                operation,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    fn update(&self, channel_id: &ChannelId, f: impl FnOnce(&mut ChannelEntry)) -> Option<Channel> {
        let mut channels = self.write();
        let entry = channels.get_mut(channel_id)?;
        f(entry);
        Some(entry.channel.clone())
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ChannelId, ChannelEntry>> {
        self.channels.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ChannelId, ChannelEntry>> {
        self.channels.write().unwrap_or_else(PoisonError::into_inner)
    }
}
