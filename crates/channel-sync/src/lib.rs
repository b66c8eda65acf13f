//! Sales-channel synchronization.
//!
//! This crate provides:
//! - the [`ChannelAdapter`] contract for external channel APIs, with an
//!   in-memory adapter
//! - a per-channel, per-resource fixed-window [`RateLimiter`]
//! - the [`SyncOrchestrator`], which connects channels, runs inbound and
//!   outbound syncs and reconciles conflicting channel quantities
//! - the [`SyncScheduler`] for periodic syncs and the [`WebhookIngestor`]
//!   for pushed updates

pub mod adapter;
pub mod channel;
pub mod error;
pub mod events;
pub mod mapping;
pub mod orchestrator;
pub mod rate_limit;
pub mod reports;
pub mod review;
pub mod scheduler;
pub mod webhook;

pub use adapter::{ChannelAdapter, FetchOptions, HealthStatus, InMemoryChannelAdapter};
pub use channel::{Channel, ChannelMetrics, ChannelSettings, ChannelStatus, ChannelType};
pub use error::{AdapterError, Result, SyncError, WebhookError};
pub use events::ChannelEvent;
pub use mapping::{ChannelRecord, FieldMapping};
pub use orchestrator::{
    ConflictOutcome, SYNC_REQUESTED, SyncConfig, SyncDirection, SyncOptions, SyncOrchestrator,
    SyncReport, SyncRequest,
};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use reports::ReportBook;
pub use review::{PendingReview, ReviewQueue};
pub use scheduler::SyncScheduler;
pub use webhook::{WEBHOOK_RESOURCE, WebhookIngestor, WebhookOutcome};
