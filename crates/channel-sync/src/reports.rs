//! Last reported quantities per product and channel.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use common::{ChannelId, ProductId};
use inventory::{ConflictReport, QuantityReport};

/// Keeps each channel's latest report for each product. Conflict reports for
/// a product are built from it.
#[derive(Debug, Default)]
pub struct ReportBook {
    reports: RwLock<HashMap<ProductId, Vec<QuantityReport>>>,
}

impl ReportBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a channel's report, replacing its previous one. Reporters keep
    /// the order in which they first reported.
    pub fn record(
        &self,
        product_id: &ProductId,
        channel_id: &ChannelId,
        quantity: u32,
        last_updated_at: DateTime<Utc>,
    ) {
        let mut reports = self.reports.write().unwrap_or_else(PoisonError::into_inner);
        let entries = reports.entry(product_id.clone()).or_default();
        match entries.iter_mut().find(|r| &r.channel_id == channel_id) {
            Some(entry) => {
                entry.quantity = quantity;
                entry.last_updated_at = last_updated_at;
            }
            None => entries.push(QuantityReport {
                channel_id: channel_id.clone(),
                quantity,
                last_updated_at,
            }),
        }
    }

    /// Builds the conflict report for a product.
    pub fn report_for(&self, product_id: &ProductId) -> ConflictReport {
        let reports = self.reports.read().unwrap_or_else(PoisonError::into_inner);
        ConflictReport {
            product_id: product_id.clone(),
            reports: reports.get(product_id).cloned().unwrap_or_default(),
        }
    }

    /// Sets every reporter of a product to a settled quantity.
    pub fn settle(&self, product_id: &ProductId, quantity: u32, at: DateTime<Utc>) {
        let mut reports = self.reports.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entries) = reports.get_mut(product_id) {
            for entry in entries {
                entry.quantity = quantity;
                entry.last_updated_at = at;
            }
        }
    }

    /// Forgets every report from a channel.
    pub fn forget_channel(&self, channel_id: &ChannelId) {
        let mut reports = self.reports.write().unwrap_or_else(PoisonError::into_inner);
        for entries in reports.values_mut() {
            entries.retain(|r| &r.channel_id != channel_id);
        }
        reports.retain(|_, entries| !entries.is_empty());
    }
}
