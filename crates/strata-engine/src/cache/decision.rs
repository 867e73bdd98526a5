use chrono::{DateTime, Utc};

use super::entry::CacheEntry;
use super::tier::TierConfig;

/// Placement verdict for one entry, evaluated against the tier geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// Entry stays where it is.
    Keep,
    /// Entry qualifies for the next-faster tier.
    Promote,
    /// Entry is idle and moves to the next-slower tier.
    Demote,
    /// Entry is idle in the last tier and leaves the cache.
    Evict,
}

/// Pure placement decision for `entry` sitting in `tiers[tier_index]`.
///
/// Promotion wins over demotion: an entry hot enough to climb is not idle.
/// Pinned entries never move.
#[must_use]
pub fn evaluate(
    entry: &CacheEntry,
    tier_index: usize,
    tiers: &[TierConfig],
    now: DateTime<Utc>,
) -> CacheDecision {
    if entry.pinned {
        return CacheDecision::Keep;
    }

    if tier_index > 0 && entry.access_count >= tiers[tier_index - 1].promote_threshold {
        return CacheDecision::Promote;
    }

    if let Some(demote_after) = tiers[tier_index].demote_after() {
        let demote_after = chrono::Duration::from_std(demote_after)
            .unwrap_or_else(|_| chrono::Duration::max_value());
        if entry.idle(now) >= demote_after {
            return if tier_index + 1 == tiers.len() {
                CacheDecision::Evict
            } else {
                CacheDecision::Demote
            };
        }
    }

    CacheDecision::Keep
}
