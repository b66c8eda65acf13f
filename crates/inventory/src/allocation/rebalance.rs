//! Redistribution of available stock across channels.

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};

use super::{ChannelAllocation, ChannelTarget};

/// How available stock is split between channels on rebalance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalancePolicy {
    /// `floor(available / count)` per channel, clamped to its bounds.
    #[default]
    EvenSplit,
    /// Shares proportional to priority, clamped to bounds.
    PriorityWeighted,
}

impl RebalancePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebalancePolicy::EvenSplit => "even_split",
            RebalancePolicy::PriorityWeighted => "priority_weighted",
        }
    }
}

impl std::fmt::Display for RebalancePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RebalancePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "even_split" => Ok(RebalancePolicy::EvenSplit),
            "priority_weighted" => Ok(RebalancePolicy::PriorityWeighted),
            other => Err(format!("unknown rebalance policy: {other}")),
        }
    }
}

/// Computes new allocated quantities for every channel of one product.
///
/// Channels are visited in descending priority (ties by channel id). Each
/// channel first receives its minimum level, then its policy share clamped to
/// `[min_level, max_level]`, then any units left over go to the highest
/// priority channels that still have headroom. The targets never sum above
/// `available`; when minimums alone exceed it, higher priorities are served
/// first.
pub fn compute_targets(
    policy: RebalancePolicy,
    available: u32,
    allocations: &[ChannelAllocation],
) -> Vec<ChannelTarget> {
    let mut ordered: Vec<&ChannelAllocation> = allocations.iter().collect();
    ordered.sort_by_key(|a| (Reverse(a.priority), a.channel_id.clone()));

    if ordered.is_empty() {
        return Vec::new();
    }

    let shares = shares(policy, available, &ordered);
    let mut targets = vec![0u32; ordered.len()];
    let mut remaining = available;

    for (target, allocation) in targets.iter_mut().zip(&ordered) {
        let grant = allocation.min_level.min(remaining);
        *target = grant;
        remaining -= grant;
    }

    for ((target, allocation), share) in targets.iter_mut().zip(&ordered).zip(&shares) {
        let desired = clamp(*share, allocation);
        let grant = desired.saturating_sub(*target).min(remaining);
        *target += grant;
        remaining -= grant;
    }

    for (target, allocation) in targets.iter_mut().zip(&ordered) {
        if remaining == 0 {
            break;
        }
        let ceiling = allocation.max_level.unwrap_or(u32::MAX);
        let grant = ceiling.saturating_sub(*target).min(remaining);
        *target += grant;
        remaining -= grant;
    }

    ordered
        .iter()
        .zip(targets)
        .map(|(allocation, target)| ChannelTarget {
            channel_id: allocation.channel_id.clone(),
            previous: allocation.allocated_quantity,
            target,
        })
        .collect()
}

fn shares(policy: RebalancePolicy, available: u32, ordered: &[&ChannelAllocation]) -> Vec<u32> {
    match policy {
        RebalancePolicy::EvenSplit => {
            let even = available / ordered.len() as u32;
            vec![even; ordered.len()]
        }
        RebalancePolicy::PriorityWeighted => {
            let weights: Vec<u64> = ordered
                .iter()
                .map(|a| a.priority.max(1) as u64)
                .collect();
            let total: u64 = weights.iter().sum();
            weights
                .iter()
                .map(|w| (available as u64 * w / total) as u32)
                .collect()
        }
    }
}

fn clamp(share: u32, allocation: &ChannelAllocation) -> u32 {
    let share = share.max(allocation.min_level);
    match allocation.max_level {
        Some(max) => share.min(max.max(allocation.min_level)),
        None => share,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ChannelId, ProductId};

    fn channel(id: &str, priority: i32, min: u32, max: Option<u32>) -> ChannelAllocation {
        let mut allocation = ChannelAllocation::new(ChannelId::new(id), ProductId::new("SKU-001"));
        allocation.priority = priority;
        allocation.min_level = min;
        allocation.max_level = max;
        allocation
    }

    fn quantities(targets: &[ChannelTarget]) -> Vec<(&str, u32)> {
        targets
            .iter()
            .map(|t| (t.channel_id.as_str(), t.target))
            .collect()
    }

    #[test]
    fn test_even_split_gives_leftover_to_highest_priority() {
        let allocations = vec![
            channel("ebay", 1, 0, None),
            channel("shopify", 3, 0, None),
            channel("amazon", 2, 0, None),
        ];

        let targets = compute_targets(RebalancePolicy::EvenSplit, 100, &allocations);
        assert_eq!(
            quantities(&targets),
            vec![("shopify", 34), ("amazon", 33), ("ebay", 33)]
        );
    }

    #[test]
    fn test_even_split_respects_bounds() {
        let allocations = vec![
            channel("shopify", 3, 0, Some(20)),
            channel("amazon", 2, 40, None),
            channel("ebay", 1, 0, None),
        ];

        let targets = compute_targets(RebalancePolicy::EvenSplit, 90, &allocations);
        // Shares of 30: shopify capped at 20, amazon raised to 40, ebay 30.
        assert_eq!(
            quantities(&targets),
            vec![("shopify", 20), ("amazon", 40), ("ebay", 30)]
        );
    }

    #[test]
    fn test_minimums_served_by_priority_when_stock_is_short() {
        let allocations = vec![
            channel("shopify", 3, 30, None),
            channel("amazon", 2, 30, None),
            channel("ebay", 1, 30, None),
        ];

        let targets = compute_targets(RebalancePolicy::EvenSplit, 50, &allocations);
        assert_eq!(
            quantities(&targets),
            vec![("shopify", 30), ("amazon", 20), ("ebay", 0)]
        );
    }

    #[test]
    fn test_priority_weighted_shares() {
        let allocations = vec![channel("shopify", 3, 0, None), channel("ebay", 1, 0, None)];

        let targets = compute_targets(RebalancePolicy::PriorityWeighted, 100, &allocations);
        assert_eq!(quantities(&targets), vec![("shopify", 75), ("ebay", 25)]);
    }

    #[test]
    fn test_zero_priority_weighs_one() {
        let allocations = vec![channel("a", 0, 0, None), channel("b", 0, 0, None)];

        let targets = compute_targets(RebalancePolicy::PriorityWeighted, 10, &allocations);
        assert_eq!(quantities(&targets), vec![("a", 5), ("b", 5)]);
    }

    #[test]
    fn test_targets_never_exceed_available() {
        let allocations = vec![
            channel("a", 2, 10, Some(15)),
            channel("b", 1, 10, Some(15)),
            channel("c", 0, 0, Some(1)),
        ];

        for available in [0, 5, 17, 31, 100] {
            for policy in [RebalancePolicy::EvenSplit, RebalancePolicy::PriorityWeighted] {
                let targets = compute_targets(policy, available, &allocations);
                let total: u32 = targets.iter().map(|t| t.target).sum();
                assert!(total <= available, "{policy} over {available}: {total}");
            }
        }
    }

    #[test]
    fn test_previous_quantity_is_reported() {
        let mut allocation = channel("shopify", 1, 0, None);
        allocation.allocated_quantity = 12;

        let targets = compute_targets(RebalancePolicy::EvenSplit, 8, &[allocation]);
        assert_eq!(targets[0].previous, 12);
        assert_eq!(targets[0].target, 8);
        assert!(targets[0].is_change());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "priority_weighted".parse::<RebalancePolicy>().unwrap(),
            RebalancePolicy::PriorityWeighted
        );
        assert!("random".parse::<RebalancePolicy>().is_err());
    }
}
