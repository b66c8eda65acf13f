//! Conflicts waiting for a human decision.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use common::{AggregateId, ChannelId};
use inventory::{ConflictDetection, ConflictReport};
use serde::{Deserialize, Serialize};

/// A conflict queued for review because its strategy is `manual`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReview {
    pub id: AggregateId,
    pub report: ConflictReport,
    pub detection: ConflictDetection,
    /// Channel whose report raised the conflict.
    pub raised_by: ChannelId,
    pub queued_at: DateTime<Utc>,
}

/// FIFO queue of [`PendingReview`]s.
#[derive(Debug, Default)]
pub struct ReviewQueue {
    pending: Mutex<VecDeque<PendingReview>>,
}

impl ReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a review. A product already waiting has its review replaced
    /// with the newer report.
    pub fn push(
        &self,
        report: ConflictReport,
        detection: ConflictDetection,
        raised_by: ChannelId,
    ) -> AggregateId {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|r| r.report.product_id != report.product_id);

        let id = AggregateId::new();
        pending.push_back(PendingReview {
            id,
            report,
            detection,
            raised_by,
            queued_at: Utc::now(),
        });
        id
    }

    /// Returns the pending reviews, oldest first.
    pub fn pending(&self) -> Vec<PendingReview> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Removes and returns a review.
    pub fn take(&self, id: AggregateId) -> Option<PendingReview> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let index = pending.iter().position(|r| r.id == id)?;
        pending.remove(index)
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
