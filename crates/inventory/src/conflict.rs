//! Reconciliation of divergent channel-reported quantities.
//!
//! Every strategy is a pure function over a [`ConflictReport`]; the resolver
//! holds configuration only.

use std::cmp::Reverse;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{ChannelId, ProductId};
use serde::{Deserialize, Serialize};

use crate::error::ConflictError;

/// One channel's view of a product's quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityReport {
    pub channel_id: ChannelId,
    pub quantity: u32,
    pub last_updated_at: DateTime<Utc>,
}

/// Quantities reported by several channels for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub product_id: ProductId,
    pub reports: Vec<QuantityReport>,
}

impl ConflictReport {
    /// Creates an empty report.
    pub fn new(product_id: impl Into<ProductId>) -> Self {
        Self {
            product_id: product_id.into(),
            reports: Vec::new(),
        }
    }

    /// Adds a channel report.
    pub fn with_report(
        mut self,
        channel_id: impl Into<ChannelId>,
        quantity: u32,
        last_updated_at: DateTime<Utc>,
    ) -> Self {
        self.reports.push(QuantityReport {
            channel_id: channel_id.into(),
            quantity,
            last_updated_at,
        });
        self
    }

    /// Returns the reported quantities in report order.
    pub fn quantities(&self) -> Vec<u32> {
        self.reports.iter().map(|r| r.quantity).collect()
    }

    /// Returns true if there are no reports.
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

/// Severity of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    Minor,
    Major,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::Minor => "minor",
            ConflictType::Major => "major",
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of conflict detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDetection {
    pub has_conflict: bool,
    /// `max(quantities) - min(quantities)`.
    pub variance: u32,
    pub conflict_type: ConflictType,
}

/// How a conflict is settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Most recently updated report wins.
    #[default]
    LastWriteWins,
    /// Smallest quantity wins, minimizing overselling.
    Conservative,
    /// Channel with the lowest configured rank wins.
    SourcePriority,
    /// Rounded mean of all reports.
    Average,
    /// Left for human review.
    Manual,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::LastWriteWins => "last_write_wins",
            ResolutionStrategy::Conservative => "conservative",
            ResolutionStrategy::SourcePriority => "source_priority",
            ResolutionStrategy::Average => "average",
            ResolutionStrategy::Manual => "manual",
        }
    }
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ResolutionStrategy {
    type Err = ConflictError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last_write_wins" => Ok(ResolutionStrategy::LastWriteWins),
            "conservative" => Ok(ResolutionStrategy::Conservative),
            "source_priority" => Ok(ResolutionStrategy::SourcePriority),
            "average" => Ok(ResolutionStrategy::Average),
            "manual" => Ok(ResolutionStrategy::Manual),
            other => Err(ConflictError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Resolver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    /// Variance above which a conflict is `major`.
    pub major_threshold: u32,
    pub default_strategy: ResolutionStrategy,
    /// Rank per channel for `source_priority`; lower wins.
    pub priority_ranks: HashMap<ChannelId, u32>,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            major_threshold: 10,
            default_strategy: ResolutionStrategy::default(),
            priority_ranks: HashMap::new(),
        }
    }
}

impl ConflictConfig {
    /// Adds a channel rank.
    pub fn with_rank(mut self, channel_id: impl Into<ChannelId>, rank: u32) -> Self {
        self.priority_ranks.insert(channel_id.into(), rank);
        self
    }

    /// Sets the default strategy.
    pub fn with_default_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }
}

/// Outcome of resolving a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Resolution {
    Resolved {
        quantity: u32,
        strategy: ResolutionStrategy,
        /// The report the quantity was taken from, when there is one.
        source_channel: Option<ChannelId>,
    },
    Unresolved {
        strategy: ResolutionStrategy,
    },
}

impl Resolution {
    /// Returns the chosen quantity, if resolved.
    pub fn quantity(&self) -> Option<u32> {
        match self {
            Resolution::Resolved { quantity, .. } => Some(*quantity),
            Resolution::Unresolved { .. } => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved { .. })
    }
}

/// Detects and resolves quantity conflicts.
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    config: ConflictConfig,
}

impl ConflictResolver {
    pub fn new(config: ConflictConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConflictConfig {
        &self.config
    }

    /// Measures the spread between reported quantities.
    pub fn detect(&self, report: &ConflictReport) -> ConflictDetection {
        let quantities = report.quantities();
        let max = quantities.iter().copied().max().unwrap_or(0);
        let min = quantities.iter().copied().min().unwrap_or(0);
        let variance = max - min;

        ConflictDetection {
            has_conflict: variance != 0,
            variance,
            conflict_type: if variance > self.config.major_threshold {
                ConflictType::Major
            } else {
                ConflictType::Minor
            },
        }
    }

    /// Resolves with the configured default strategy.
    pub fn resolve_default(&self, report: &ConflictReport) -> Result<Resolution, ConflictError> {
        self.resolve(report, self.config.default_strategy)
    }

    /// Resolves a report with the given strategy.
    pub fn resolve(
        &self,
        report: &ConflictReport,
        strategy: ResolutionStrategy,
    ) -> Result<Resolution, ConflictError> {
        if report.is_empty() {
            return Err(ConflictError::EmptyReport(report.product_id.clone()));
        }

        let from_report = |r: &QuantityReport| Resolution::Resolved {
            quantity: r.quantity,
            strategy,
            source_channel: Some(r.channel_id.clone()),
        };

        let resolution = match strategy {
            ResolutionStrategy::LastWriteWins => Self::last_write_wins(report).map(from_report),
            ResolutionStrategy::Conservative => report
                .reports
                .iter()
                .min_by_key(|r| r.quantity)
                .map(from_report),
            ResolutionStrategy::SourcePriority => self.source_priority(report).map(from_report),
            ResolutionStrategy::Average => {
                Self::average(&report.quantities()).map(|quantity| Resolution::Resolved {
                    quantity,
                    strategy,
                    source_channel: None,
                })
            }
            ResolutionStrategy::Manual => Some(Resolution::Unresolved { strategy }),
        };

        resolution.ok_or_else(|| ConflictError::EmptyReport(report.product_id.clone()))
    }

    /// Smallest quantity.
    pub fn conservative(quantities: &[u32]) -> Option<u32> {
        quantities.iter().copied().min()
    }

    /// Mean rounded half up.
    pub fn average(quantities: &[u32]) -> Option<u32> {
        if quantities.is_empty() {
            return None;
        }
        let n = quantities.len() as u64;
        let sum: u64 = quantities.iter().map(|&q| q as u64).sum();
        Some(((2 * sum + n) / (2 * n)) as u32)
    }

    /// Report with the latest update; the earliest listed wins a tie.
    pub fn last_write_wins(report: &ConflictReport) -> Option<&QuantityReport> {
        report
            .reports
            .iter()
            .min_by_key(|r| Reverse(r.last_updated_at))
    }

    /// Report from the lowest-ranked channel. Unranked channels come last;
    /// the earliest listed wins a tie.
    pub fn source_priority<'a>(&self, report: &'a ConflictReport) -> Option<&'a QuantityReport> {
        report.reports.iter().min_by_key(|r| {
            self.config
                .priority_ranks
                .get(&r.channel_id)
                .copied()
                .unwrap_or(u32::MAX)
        })
    }
}
