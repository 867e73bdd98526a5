//! Live usage counters for a backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Usage counters for a single backend.
///
/// Mutated only by the resource tracker under its per-backend lock;
/// read-mostly by the quota enforcer via atomic snapshots. The `pending_*`
/// fields hold reserved-but-uncommitted deltas from the reserve/commit
/// protocol, so projected usage is `used + pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Bytes currently stored.
    pub bytes_used: u64,
    /// Files currently stored.
    pub file_count: u64,
    /// Bytes transferred in the current traffic window.
    pub bytes_in_window: u64,
    /// Requests issued in the current traffic window.
    pub requests_in_window: u64,
    /// Reserved bytes not yet committed.
    pub pending_bytes: u64,
    /// Reserved files not yet committed.
    pub pending_files: u64,
    /// Start of the current traffic window.
    pub last_reset_at: DateTime<Utc>,
}

impl Default for UsageRecord {
    fn default() -> Self {
        Self {
            bytes_used: 0,
            file_count: 0,
            bytes_in_window: 0,
            requests_in_window: 0,
            pending_bytes: 0,
            pending_files: 0,
            last_reset_at: Utc::now(),
        }
    }
}

impl UsageRecord {
    /// Stored plus reserved bytes, the value quota checks project against.
    #[must_use]
    pub fn projected_bytes(&self) -> u64 {
        self.bytes_used + self.pending_bytes
    }

    /// Stored plus reserved files.
    #[must_use]
    pub fn projected_files(&self) -> u64 {
        self.file_count + self.pending_files
    }

    /// Rolls the traffic window forward when it has elapsed.
    ///
    /// Windows are fixed-length and reset lazily on the next access, which
    /// approximates (rather than implements) a true sliding window: a burst
    /// straddling a reset can briefly see a fresh budget.
    pub fn roll_window(&mut self, window: Duration, now: DateTime<Utc>) {
        let elapsed = now.signed_duration_since(self.last_reset_at);
        let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::max_value());
        if elapsed >= window {
            self.bytes_in_window = 0;
            self.requests_in_window = 0;
            self.last_reset_at = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projected_includes_pending() {
        let record = UsageRecord {
            bytes_used: 800,
            pending_bytes: 150,
            file_count: 3,
            pending_files: 1,
            ..Default::default()
        };
        assert_eq!(record.projected_bytes(), 950);
        assert_eq!(record.projected_files(), 4);
    }

    #[test]
    fn test_roll_window_elapsed() {
        let mut record = UsageRecord {
            bytes_in_window: 500,
            requests_in_window: 9,
            ..Default::default()
        };
        let later = record.last_reset_at + chrono::Duration::seconds(120);

        record.roll_window(Duration::from_secs(60), later);
        assert_eq!(record.bytes_in_window, 0);
        assert_eq!(record.requests_in_window, 0);
        assert_eq!(record.last_reset_at, later);
    }

    #[test]
    fn test_roll_window_not_elapsed() {
        let mut record = UsageRecord {
            bytes_in_window: 500,
            ..Default::default()
        };
        let reset_at = record.last_reset_at;
        let later = reset_at + chrono::Duration::seconds(30);

        record.roll_window(Duration::from_secs(60), later);
        assert_eq!(record.bytes_in_window, 500);
        assert_eq!(record.last_reset_at, reset_at);
    }
}
