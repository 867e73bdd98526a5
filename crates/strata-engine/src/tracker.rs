//! Live resource usage tracking.
//!
//! The tracker is the only writer of usage state. Each backend has its own
//! mutex-guarded record; cross-backend operations never share a lock. Traffic
//! windows are fixed-length and reset lazily on the next access.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use strata_core::{BackendId, CoreError, CoreResult, UsageRecord};

/// Signed usage update applied after an operation succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageDelta {
    /// Change in stored bytes.
    pub bytes: i64,
    /// Change in stored file count.
    pub files: i64,
    /// Bytes transferred by this operation.
    pub transfer_bytes: u64,
    /// Requests issued by this operation.
    pub requests: u64,
}

impl UsageDelta {
    /// Delta for a newly stored object.
    #[must_use]
    pub fn stored(size: u64) -> Self {
        Self {
            bytes: size as i64,
            files: 1,
            ..Default::default()
        }
    }

    /// Delta for a deleted object.
    #[must_use]
    pub fn deleted(size: u64) -> Self {
        Self {
            bytes: -(size as i64),
            files: -1,
            ..Default::default()
        }
    }

    /// Delta for a transfer of `size` bytes counting as one request.
    #[must_use]
    pub fn transfer(size: u64) -> Self {
        Self {
            transfer_bytes: size,
            requests: 1,
            ..Default::default()
        }
    }

    /// Adds transfer accounting to a storage delta.
    #[must_use]
    pub fn with_transfer(mut self, size: u64) -> Self {
        self.transfer_bytes += size;
        self.requests += 1;
        self
    }
}

/// Limits a reservation is validated against, taken from the storage quota.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReserveLimits {
    /// Maximum stored bytes, `None` when unbounded.
    pub max_bytes: Option<u64>,
    /// Maximum stored files, `None` when unbounded.
    pub max_files: Option<u64>,
}

/// Token for a reserved delta.
///
/// A reservation moves its delta into the backend's pending totals; the
/// holder settles it with [`ResourceTracker::commit`] after the operation
/// succeeds or [`ResourceTracker::release`] after it fails.
#[derive(Debug)]
pub struct Reservation {
    backend: BackendId,
    bytes: u64,
    files: u64,
}

impl Reservation {
    /// Backend the reservation was taken on.
    #[must_use]
    pub fn backend(&self) -> &BackendId {
        &self.backend
    }

    /// Reserved bytes.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// Per-backend usage tracker.
pub struct ResourceTracker {
    records: RwLock<HashMap<BackendId, Arc<Mutex<UsageRecord>>>>,
}

impl ResourceTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    fn record_handle(&self, backend: &BackendId) -> Arc<Mutex<UsageRecord>> {
        if let Some(handle) = self.records.read().get(backend) {
            return Arc::clone(handle);
        }
        let mut records = self.records.write();
        Arc::clone(
            records
                .entry(backend.clone())
                .or_insert_with(|| Arc::new(Mutex::new(UsageRecord::default()))),
        )
    }

    /// Applies a usage update for a completed operation.
    ///
    /// `window` is the backend's traffic window when a traffic quota is
    /// configured; elapsed windows are rolled before the update lands.
    pub fn record(&self, backend: &BackendId, delta: UsageDelta, window: Option<Duration>) {
        let handle = self.record_handle(backend);
        let mut record = handle.lock();
        if let Some(window) = window {
            record.roll_window(window, Utc::now());
        }
        apply_signed(&mut record.bytes_used, delta.bytes);
        apply_signed(&mut record.file_count, delta.files);
        record.bytes_in_window += delta.transfer_bytes;
        record.requests_in_window += delta.requests;
    }

    /// Returns a consistent copy of the backend's usage record.
    ///
    /// Rolls an elapsed traffic window first, so readers never observe stale
    /// window counters.
    #[must_use]
    pub fn snapshot(&self, backend: &BackendId, window: Option<Duration>) -> UsageRecord {
        let handle = self.record_handle(backend);
        let mut record = handle.lock();
        if let Some(window) = window {
            record.roll_window(window, Utc::now());
        }
        record.clone()
    }

    /// Atomically validates and reserves a storage delta.
    ///
    /// Projected usage (live plus pending plus this delta) is re-validated
    /// against `limits` under the backend's lock, closing the check-act race
    /// between concurrent callers.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::QuotaExceeded` when the delta does not fit.
    pub fn reserve(
        &self,
        backend: &BackendId,
        bytes: u64,
        files: u64,
        limits: ReserveLimits,
    ) -> CoreResult<Reservation> {
        let handle = self.record_handle(backend);
        let mut record = handle.lock();

        if let Some(max_bytes) = limits.max_bytes {
            let projected = record.projected_bytes() + bytes;
            if projected > max_bytes {
                debug!(
                    backend = %backend,
                    projected,
                    max_bytes,
                    "reservation rejected"
                );
                return Err(CoreError::quota_exceeded(format!(
                    "backend `{backend}` storage bytes: {projected} > {max_bytes}"
                )));
            }
        }
        if let Some(max_files) = limits.max_files {
            let projected = record.projected_files() + files;
            if projected > max_files {
                return Err(CoreError::quota_exceeded(format!(
                    "backend `{backend}` file count: {projected} > {max_files}"
                )));
            }
        }

        record.pending_bytes += bytes;
        record.pending_files += files;
        Ok(Reservation {
            backend: backend.clone(),
            bytes,
            files,
        })
    }

    /// Folds a reservation into live usage after the operation succeeded.
    pub fn commit(&self, reservation: Reservation) {
        let handle = self.record_handle(&reservation.backend);
        let mut record = handle.lock();
        record.pending_bytes = record.pending_bytes.saturating_sub(reservation.bytes);
        record.pending_files = record.pending_files.saturating_sub(reservation.files);
        record.bytes_used += reservation.bytes;
        record.file_count += reservation.files;
    }

    /// Drops a reservation after the operation failed.
    pub fn release(&self, reservation: Reservation) {
        let handle = self.record_handle(&reservation.backend);
        let mut record = handle.lock();
        record.pending_bytes = record.pending_bytes.saturating_sub(reservation.bytes);
        record.pending_files = record.pending_files.saturating_sub(reservation.files);
    }
}

impl Default for ResourceTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_signed(counter: &mut u64, delta: i64) {
    if delta >= 0 {
        *counter += delta as u64;
    } else {
        *counter = counter.saturating_sub(delta.unsigned_abs());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> BackendId {
        BackendId::new("s3-east")
    }

    #[test]
    fn test_record_and_snapshot() {
        let tracker = ResourceTracker::new();

        tracker.record(&backend(), UsageDelta::stored(1000), None);
        tracker.record(&backend(), UsageDelta::stored(500), None);
        tracker.record(&backend(), UsageDelta::deleted(300), None);

        let usage = tracker.snapshot(&backend(), None);
        assert_eq!(usage.bytes_used, 1200);
        assert_eq!(usage.file_count, 1);
    }

    #[test]
    fn test_transfer_counters() {
        let tracker = ResourceTracker::new();
        let window = Some(Duration::from_secs(3600));

        tracker.record(&backend(), UsageDelta::transfer(4096), window);
        tracker.record(&backend(), UsageDelta::transfer(1024), window);

        let usage = tracker.snapshot(&backend(), window);
        assert_eq!(usage.bytes_in_window, 5120);
        assert_eq!(usage.requests_in_window, 2);
    }

    #[test]
    fn test_reserve_rejects_over_limit() {
        let tracker = ResourceTracker::new();
        tracker.record(&backend(), UsageDelta::stored(800), None);

        let limits = ReserveLimits {
            max_bytes: Some(1000),
            max_files: None,
        };
        let result = tracker.reserve(&backend(), 300, 1, limits);
        assert!(matches!(result, Err(CoreError::QuotaExceeded { .. })));

        // Rejection leaves usage untouched.
        let usage = tracker.snapshot(&backend(), None);
        assert_eq!(usage.bytes_used, 800);
        assert_eq!(usage.pending_bytes, 0);
    }

    #[test]
    fn test_reserve_commit_moves_pending_to_live() {
        let tracker = ResourceTracker::new();
        let limits = ReserveLimits {
            max_bytes: Some(1000),
            max_files: Some(10),
        };

        let reservation = tracker.reserve(&backend(), 400, 1, limits).unwrap();
        let usage = tracker.snapshot(&backend(), None);
        assert_eq!(usage.pending_bytes, 400);
        assert_eq!(usage.bytes_used, 0);

        tracker.commit(reservation);
        let usage = tracker.snapshot(&backend(), None);
        assert_eq!(usage.pending_bytes, 0);
        assert_eq!(usage.bytes_used, 400);
        assert_eq!(usage.file_count, 1);
    }

    #[test]
    fn test_release_drops_pending() {
        let tracker = ResourceTracker::new();
        let limits = ReserveLimits::default();

        let reservation = tracker.reserve(&backend(), 400, 1, limits).unwrap();
        tracker.release(reservation);

        let usage = tracker.snapshot(&backend(), None);
        assert_eq!(usage.pending_bytes, 0);
        assert_eq!(usage.bytes_used, 0);
    }

    #[test]
    fn test_pending_blocks_concurrent_overcommit() {
        let tracker = ResourceTracker::new();
        let limits = ReserveLimits {
            max_bytes: Some(1000),
            max_files: None,
        };

        let first = tracker.reserve(&backend(), 600, 1, limits).unwrap();
        // A second reservation sees the pending 600 and must fail.
        assert!(tracker.reserve(&backend(), 600, 1, limits).is_err());

        tracker.release(first);
        assert!(tracker.reserve(&backend(), 600, 1, limits).is_ok());
    }

    #[test]
    fn test_backends_are_independent() {
        let tracker = ResourceTracker::new();
        let other = BackendId::new("fil-market");

        tracker.record(&backend(), UsageDelta::stored(100), None);
        let usage = tracker.snapshot(&other, None);
        assert_eq!(usage.bytes_used, 0);
    }

    #[test]
    fn test_concurrent_reserve_never_exceeds_limit() {
        let tracker = Arc::new(ResourceTracker::new());
        let limits = ReserveLimits {
            max_bytes: Some(1000),
            max_files: None,
        };

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    if let Ok(reservation) = tracker.reserve(&backend(), 100, 1, limits) {
                        tracker.commit(reservation);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let usage = tracker.snapshot(&backend(), None);
        assert!(usage.bytes_used <= 1000);
        assert_eq!(usage.pending_bytes, 0);
    }
}
