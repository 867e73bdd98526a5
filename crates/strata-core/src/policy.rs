//! Policy documents attached to backends.
//!
//! A backend holds at most one active instance of each policy kind. Policies
//! are a closed sum type so validation stays exhaustive; adding a kind is a
//! compile-time event, not a runtime surprise.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CoreError, CoreResult};
use crate::ids::BackendId;

/// Discriminant for the five policy variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    StorageQuota,
    TrafficQuota,
    Replication,
    Retention,
    Cache,
}

impl PolicyKind {
    /// Get string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StorageQuota => "storage_quota",
            Self::TrafficQuota => "traffic_quota",
            Self::Replication => "replication",
            Self::Retention => "retention",
            Self::Cache => "cache",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "storage_quota" => Ok(Self::StorageQuota),
            "traffic_quota" => Ok(Self::TrafficQuota),
            "replication" => Ok(Self::Replication),
            "retention" => Ok(Self::Retention),
            "cache" => Ok(Self::Cache),
            _ => Err(format!("invalid policy kind: {s}")),
        }
    }
}

/// Upper bounds on stored bytes and file count for a backend.
///
/// A limit of `0` means unbounded for that dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageQuotaPolicy {
    /// Maximum stored bytes (0 = unlimited).
    pub max_bytes: u64,
    /// Maximum stored file count (0 = unlimited).
    pub max_files: u64,
    /// Fraction of a limit at which a warn violation is raised, in `(0, 1]`.
    pub warn_threshold: f64,
}

impl Default for StorageQuotaPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 0,
            max_files: 0,
            warn_threshold: 0.8,
        }
    }
}

impl StorageQuotaPolicy {
    /// Validate field ranges.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPolicy` when `warn_threshold` falls outside `(0, 1]`.
    pub fn validate(&self) -> CoreResult<()> {
        if !(self.warn_threshold > 0.0 && self.warn_threshold <= 1.0) {
            return Err(CoreError::invalid_policy(format!(
                "warn_threshold must be in (0, 1], got {}",
                self.warn_threshold
            )));
        }
        Ok(())
    }

    /// Returns `true` when the byte limit is unbounded.
    #[must_use]
    pub fn is_bytes_unbounded(&self) -> bool {
        self.max_bytes == 0
    }

    /// Returns `true` when the file-count limit is unbounded.
    #[must_use]
    pub fn is_files_unbounded(&self) -> bool {
        self.max_files == 0
    }
}

/// Upper bounds on transferred bytes and request count per time window.
///
/// Windows are fixed and reset lazily: counters roll over on the first access
/// after the window elapses, never via a background timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficQuotaPolicy {
    /// Maximum bytes transferred per window (0 = unlimited).
    pub max_bytes_per_window: u64,
    /// Window length in seconds.
    pub window_secs: u64,
    /// Maximum requests per window (0 = unlimited).
    pub max_requests_per_window: u64,
}

impl Default for TrafficQuotaPolicy {
    fn default() -> Self {
        Self {
            max_bytes_per_window: 0,
            window_secs: 3600,
            max_requests_per_window: 0,
        }
    }
}

impl TrafficQuotaPolicy {
    /// Validate field ranges.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPolicy` when the window length is zero.
    pub fn validate(&self) -> CoreResult<()> {
        if self.window_secs == 0 {
            return Err(CoreError::invalid_policy("window_secs must be >= 1"));
        }
        Ok(())
    }

    /// Window length as a `Duration`.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Replica placement strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationStrategy {
    /// Fill targets in declared preference order.
    Simple,
    /// Spread the minimum replica set across distinct cost tiers first.
    GeoAware,
}

impl Default for ReplicationStrategy {
    fn default() -> Self {
        Self::Simple
    }
}

/// Redundancy requirements for objects stored under a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationPolicy {
    /// Placement strategy.
    pub strategy: ReplicationStrategy,
    /// Minimum number of verified replicas; `ensure` fails below this.
    pub min_redundancy: u32,
    /// Maximum number of replicas placed opportunistically.
    pub max_redundancy: u32,
    /// Candidate backends in preference order.
    pub preferred_backends: Vec<BackendId>,
}

impl ReplicationPolicy {
    /// Creates a simple-strategy policy.
    #[must_use]
    pub fn simple(
        min_redundancy: u32,
        max_redundancy: u32,
        preferred_backends: Vec<BackendId>,
    ) -> Self {
        Self {
            strategy: ReplicationStrategy::Simple,
            min_redundancy,
            max_redundancy,
            preferred_backends,
        }
    }

    /// Validate field ranges and ordering invariants.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPolicy` when `min_redundancy` is zero,
    /// exceeds `max_redundancy`, or `preferred_backends` contains duplicates.
    pub fn validate(&self) -> CoreResult<()> {
        if self.min_redundancy == 0 {
            return Err(CoreError::invalid_policy("min_redundancy must be >= 1"));
        }
        if self.min_redundancy > self.max_redundancy {
            return Err(CoreError::invalid_policy(format!(
                "min_redundancy {} exceeds max_redundancy {}",
                self.min_redundancy, self.max_redundancy
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for backend in &self.preferred_backends {
            if !seen.insert(backend) {
                return Err(CoreError::invalid_policy(format!(
                    "preferred_backends lists `{backend}` more than once"
                )));
            }
        }
        Ok(())
    }
}

/// Age-based deletion and archival rules for objects on a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Objects younger than this may not be deleted.
    pub min_age_before_delete_secs: u64,
    /// Objects older than this become archival candidates, when set.
    pub max_age_before_archive_secs: Option<u64>,
    /// Legal hold blocks all deletion regardless of age.
    pub legal_hold: bool,
}

impl RetentionPolicy {
    /// Validate field ranges.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPolicy` when the archive age is zero.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_age_before_archive_secs == Some(0) {
            return Err(CoreError::invalid_policy(
                "max_age_before_archive_secs must be >= 1 when set",
            ));
        }
        Ok(())
    }

    /// Minimum age before deletion as a `Duration`.
    #[must_use]
    pub fn min_age(&self) -> Duration {
        Duration::from_secs(self.min_age_before_delete_secs)
    }

    /// Archival age as a `Duration`, when configured.
    #[must_use]
    pub fn archive_age(&self) -> Option<Duration> {
        self.max_age_before_archive_secs.map(Duration::from_secs)
    }
}

/// Cache participation knobs for objects stored on a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Capacity budget for this backend's objects in the fastest tier.
    pub tier_capacity_bytes: u64,
    /// Access count at which an entry becomes a promotion candidate.
    pub promote_threshold: u32,
    /// Idle time after which an entry becomes a demotion candidate.
    pub demote_after_secs: u64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            tier_capacity_bytes: 256 * 1024 * 1024,
            promote_threshold: 3,
            demote_after_secs: 6 * 3600,
        }
    }
}

impl CachePolicy {
    /// Validate field ranges.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPolicy` when any knob is zero.
    pub fn validate(&self) -> CoreResult<()> {
        if self.tier_capacity_bytes == 0 {
            return Err(CoreError::invalid_policy("tier_capacity_bytes must be >= 1"));
        }
        if self.promote_threshold == 0 {
            return Err(CoreError::invalid_policy("promote_threshold must be >= 1"));
        }
        if self.demote_after_secs == 0 {
            return Err(CoreError::invalid_policy("demote_after_secs must be >= 1"));
        }
        Ok(())
    }

    /// Idle time before demotion as a `Duration`.
    #[must_use]
    pub fn demote_after(&self) -> Duration {
        Duration::from_secs(self.demote_after_secs)
    }
}

/// Policy document attached to a backend, one active instance per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Policy {
    StorageQuota(StorageQuotaPolicy),
    TrafficQuota(TrafficQuotaPolicy),
    Replication(ReplicationPolicy),
    Retention(RetentionPolicy),
    Cache(CachePolicy),
}

impl Policy {
    /// Discriminant of this document.
    #[must_use]
    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::StorageQuota(_) => PolicyKind::StorageQuota,
            Self::TrafficQuota(_) => PolicyKind::TrafficQuota,
            Self::Replication(_) => PolicyKind::Replication,
            Self::Retention(_) => PolicyKind::Retention,
            Self::Cache(_) => PolicyKind::Cache,
        }
    }

    /// Validate variant-specific invariants.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPolicy` when numeric constraints are violated.
    pub fn validate(&self) -> CoreResult<()> {
        match self {
            Self::StorageQuota(p) => p.validate(),
            Self::TrafficQuota(p) => p.validate(),
            Self::Replication(p) => p.validate(),
            Self::Retention(p) => p.validate(),
            Self::Cache(p) => p.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_quota_threshold_range() {
        let mut policy = StorageQuotaPolicy {
            max_bytes: 1000,
            max_files: 10,
            warn_threshold: 0.8,
        };
        assert!(policy.validate().is_ok());

        policy.warn_threshold = 0.0;
        assert!(policy.validate().is_err());

        policy.warn_threshold = 1.0;
        assert!(policy.validate().is_ok());

        policy.warn_threshold = 1.5;
        assert!(policy.validate().is_err());

        policy.warn_threshold = f64::NAN;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_traffic_quota_window() {
        let mut policy = TrafficQuotaPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.window(), Duration::from_secs(3600));

        policy.window_secs = 0;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_replication_redundancy_bounds() {
        let mut policy = ReplicationPolicy::simple(
            2,
            3,
            vec![BackendId::new("a"), BackendId::new("b"), BackendId::new("c")],
        );
        assert!(policy.validate().is_ok());

        policy.min_redundancy = 0;
        assert!(policy.validate().is_err());

        policy.min_redundancy = 4;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_replication_duplicate_backends() {
        let policy = ReplicationPolicy::simple(1, 2, vec![BackendId::new("a"), BackendId::new("a")]);
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_retention_archive_age() {
        let mut policy = RetentionPolicy::default();
        assert!(policy.validate().is_ok());
        assert!(policy.archive_age().is_none());

        policy.max_age_before_archive_secs = Some(0);
        assert!(policy.validate().is_err());

        policy.max_age_before_archive_secs = Some(86_400);
        assert!(policy.validate().is_ok());
        assert_eq!(policy.archive_age(), Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn test_cache_policy_zero_knobs() {
        let mut policy = CachePolicy::default();
        assert!(policy.validate().is_ok());

        policy.promote_threshold = 0;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_policy_kind_dispatch() {
        let policy = Policy::Replication(ReplicationPolicy::simple(1, 1, vec![]));
        assert_eq!(policy.kind(), PolicyKind::Replication);
        assert_eq!(policy.kind().as_str(), "replication");
        assert_eq!("replication".parse::<PolicyKind>().unwrap(), policy.kind());
    }

    #[test]
    fn test_policy_tagged_serialization() {
        let policy = Policy::StorageQuota(StorageQuotaPolicy {
            max_bytes: 1000,
            max_files: 5,
            warn_threshold: 0.9,
        });
        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("\"kind\":\"storage_quota\""));

        let back: Policy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
    }
}
