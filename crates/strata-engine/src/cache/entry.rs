use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata_core::ObjectId;

/// Cached object metadata.
///
/// Created on first placement, updated on every access, removed on eviction
/// or explicit deletion. An entry lives in exactly one tier at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cached object.
    pub object_id: ObjectId,
    /// Object size in bytes; counts against tier capacity.
    pub size_bytes: u64,
    /// Most recent access.
    pub last_access_at: DateTime<Utc>,
    /// Accesses since placement.
    pub access_count: u32,
    /// Pinned entries are exempt from eviction and demotion.
    pub pinned: bool,
}

impl CacheEntry {
    /// Creates an entry for an object first seen at `now`.
    #[must_use]
    pub fn new(object_id: ObjectId, size_bytes: u64, now: DateTime<Utc>) -> Self {
        Self {
            object_id,
            size_bytes,
            last_access_at: now,
            access_count: 1,
            pinned: false,
        }
    }

    /// Records an access at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_access_at = now;
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Idle time relative to `now`.
    #[must_use]
    pub fn idle(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.last_access_at)
    }
}
