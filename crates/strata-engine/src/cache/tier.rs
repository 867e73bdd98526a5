use serde::{Deserialize, Serialize};
use std::time::Duration;

use strata_core::{CoreError, CoreResult};

/// Geometry of one cache tier.
///
/// Tiers are configured fastest-and-smallest first. `promote_threshold` is
/// read by the tier *below*: an entry whose access count reaches the
/// next-faster tier's threshold becomes a promotion candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Tier name, unique within the hierarchy (e.g. `"fast"`, `"cold"`).
    pub name: String,
    /// Capacity budget in bytes.
    pub capacity_bytes: u64,
    /// Access count that qualifies an entry in the next-slower tier for
    /// promotion into this tier.
    #[serde(default = "default_promote_threshold")]
    pub promote_threshold: u32,
    /// Idle time after which entries in this tier are demoted, when set.
    #[serde(default)]
    pub demote_after_secs: Option<u64>,
}

fn default_promote_threshold() -> u32 {
    3
}

impl TierConfig {
    /// Creates a tier with the given name and capacity.
    #[must_use]
    pub fn new(name: impl Into<String>, capacity_bytes: u64) -> Self {
        Self {
            name: name.into(),
            capacity_bytes,
            promote_threshold: default_promote_threshold(),
            demote_after_secs: None,
        }
    }

    /// Sets the promotion threshold.
    #[must_use]
    pub fn with_promote_threshold(mut self, promote_threshold: u32) -> Self {
        self.promote_threshold = promote_threshold;
        self
    }

    /// Sets the idle-demotion window.
    #[must_use]
    pub fn with_demote_after(mut self, demote_after: Duration) -> Self {
        self.demote_after_secs = Some(demote_after.as_secs());
        self
    }

    /// Idle-demotion window as a `Duration`, when configured.
    #[must_use]
    pub fn demote_after(&self) -> Option<Duration> {
        self.demote_after_secs.map(Duration::from_secs)
    }

    /// Validate field ranges.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPolicy` when the capacity or promotion
    /// threshold is zero.
    pub fn validate(&self) -> CoreResult<()> {
        if self.capacity_bytes == 0 {
            return Err(CoreError::invalid_policy(format!(
                "tier `{}` capacity_bytes must be >= 1",
                self.name
            )));
        }
        if self.promote_threshold == 0 {
            return Err(CoreError::invalid_policy(format!(
                "tier `{}` promote_threshold must be >= 1",
                self.name
            )));
        }
        Ok(())
    }
}

/// Validates a full hierarchy: non-empty, valid tiers, unique names.
///
/// # Errors
///
/// Returns `CoreError::InvalidPolicy` on any violation.
pub(crate) fn validate_hierarchy(tiers: &[TierConfig]) -> CoreResult<()> {
    if tiers.is_empty() {
        return Err(CoreError::invalid_policy(
            "cache hierarchy needs at least one tier",
        ));
    }
    let mut names = std::collections::HashSet::new();
    for tier in tiers {
        tier.validate()?;
        if !names.insert(tier.name.as_str()) {
            return Err(CoreError::invalid_policy(format!(
                "duplicate tier name `{}`",
                tier.name
            )));
        }
    }
    Ok(())
}
