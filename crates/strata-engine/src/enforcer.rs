//! Quota enforcement.
//!
//! The enforcer consults the policy store and the resource tracker before an
//! operation runs and settles the outcome after it completes. `check` is
//! advisory; the binding path is `admit` → adapter I/O → `commit`/`abort`,
//! which carries a tracker reservation so concurrent callers cannot jointly
//! overshoot a hard storage limit. Failed operations are never counted.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::policy_store::PolicyStore;
use crate::reporter::ViolationReporter;
use crate::tracker::{Reservation, ReserveLimits, ResourceTracker, UsageDelta};
use strata_core::{
    BackendId, CoreError, CoreResult, PolicyKind, Severity, StorageQuotaPolicy,
    TrafficQuotaPolicy, UsageRecord, Violation,
};

/// Resource footprint of a proposed operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationRequest {
    /// Bytes the operation would add to storage.
    pub delta_bytes: u64,
    /// Files the operation would add to storage.
    pub delta_files: u64,
    /// Bytes the operation transfers over the wire.
    pub transfer_bytes: u64,
    /// Whether the operation counts against the request-rate window.
    pub is_request: bool,
}

impl OperationRequest {
    /// A store of `size` bytes.
    #[must_use]
    pub fn store(size: u64) -> Self {
        Self {
            delta_bytes: size,
            delta_files: 1,
            transfer_bytes: size,
            is_request: true,
        }
    }

    /// A read transferring `size` bytes.
    #[must_use]
    pub fn read(size: u64) -> Self {
        Self {
            transfer_bytes: size,
            is_request: true,
            ..Default::default()
        }
    }

    /// A delete; frees storage, counts as one request.
    #[must_use]
    pub fn delete() -> Self {
        Self {
            is_request: true,
            ..Default::default()
        }
    }

    fn requests(&self) -> u64 {
        u64::from(self.is_request)
    }
}

/// An admitted operation holding its storage reservation.
///
/// Produced by [`QuotaEnforcer::admit`]; must be settled with
/// [`QuotaEnforcer::commit`] after the I/O succeeds or
/// [`QuotaEnforcer::abort`] after it fails.
#[derive(Debug)]
pub struct Admission {
    backend: BackendId,
    op: OperationRequest,
    reservation: Option<Reservation>,
    window: Option<Duration>,
}

impl Admission {
    /// Backend the operation was admitted on.
    #[must_use]
    pub fn backend(&self) -> &BackendId {
        &self.backend
    }
}

/// Policy-aware gatekeeper for backend operations.
pub struct QuotaEnforcer {
    policies: Arc<PolicyStore>,
    tracker: Arc<ResourceTracker>,
    reporter: Arc<ViolationReporter>,
}

impl QuotaEnforcer {
    /// Creates an enforcer over the shared store, tracker, and reporter.
    #[must_use]
    pub fn new(
        policies: Arc<PolicyStore>,
        tracker: Arc<ResourceTracker>,
        reporter: Arc<ViolationReporter>,
    ) -> Self {
        Self {
            policies,
            tracker,
            reporter,
        }
    }

    fn window(&self, backend: &BackendId) -> Option<Duration> {
        self.policies
            .traffic_quota(backend)
            .map(|policy| policy.window())
    }

    /// Advisory check: would this operation be allowed right now?
    ///
    /// Emits warn violations at the configured threshold and critical
    /// violations on hard breaches; a passing check resolves prior
    /// unresolved violations of the same kind.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::QuotaExceeded` when a hard limit would be crossed.
    pub fn check(&self, backend: &BackendId, op: OperationRequest) -> CoreResult<()> {
        self.evaluate(backend, op, true)
    }

    /// Silent eligibility probe used for replica target selection.
    ///
    /// Same decision as [`check`](Self::check) but records nothing: a
    /// backend that cannot take one more replica is not in breach of its
    /// own policy.
    #[must_use]
    pub fn would_accept(&self, backend: &BackendId, op: OperationRequest) -> bool {
        self.evaluate(backend, op, false).is_ok()
    }

    /// Binding admission: validates and reserves the storage delta.
    ///
    /// The reservation is taken under the backend's usage lock, so two
    /// concurrent admissions cannot both fit into the same remaining
    /// capacity.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::QuotaExceeded` when a hard limit would be crossed.
    pub fn admit(&self, backend: &BackendId, op: OperationRequest) -> CoreResult<Admission> {
        let window = self.window(backend);

        // Traffic limits and warn thresholds first; storage hard limits are
        // re-validated atomically by the reservation below.
        self.evaluate(backend, op, true)?;

        let reservation = if op.delta_bytes > 0 || op.delta_files > 0 {
            match self.policies.storage_quota(backend) {
                Some(quota) => {
                    let limits = ReserveLimits {
                        max_bytes: (!quota.is_bytes_unbounded()).then_some(quota.max_bytes),
                        max_files: (!quota.is_files_unbounded()).then_some(quota.max_files),
                    };
                    let reservation = self
                        .tracker
                        .reserve(backend, op.delta_bytes, op.delta_files, limits)
                        .map_err(|err| {
                            self.report_storage_breach(backend, &quota, op);
                            err
                        })?;
                    Some(reservation)
                }
                None => Some(self.tracker.reserve(
                    backend,
                    op.delta_bytes,
                    op.delta_files,
                    ReserveLimits::default(),
                )?),
            }
        } else {
            None
        };

        Ok(Admission {
            backend: backend.clone(),
            op,
            reservation,
            window,
        })
    }

    /// Settles an admission after the operation succeeded.
    ///
    /// Folds the reservation into live usage and records the transfer
    /// against the traffic window.
    pub fn commit(&self, admission: Admission) {
        let Admission {
            backend,
            op,
            reservation,
            window,
        } = admission;

        if let Some(reservation) = reservation {
            self.tracker.commit(reservation);
        }
        if op.transfer_bytes > 0 || op.is_request {
            self.tracker.record(
                &backend,
                UsageDelta {
                    transfer_bytes: op.transfer_bytes,
                    requests: op.requests(),
                    ..Default::default()
                },
                window,
            );
        }
    }

    /// Discards an admission after the operation failed.
    ///
    /// Releases the reservation; nothing is counted.
    pub fn abort(&self, admission: Admission) {
        debug!(backend = %admission.backend, "admission aborted");
        if let Some(reservation) = admission.reservation {
            self.tracker.release(reservation);
        }
    }

    fn evaluate(&self, backend: &BackendId, op: OperationRequest, report: bool) -> CoreResult<()> {
        let window = self.window(backend);
        let usage = self.tracker.snapshot(backend, window);

        if let Some(quota) = self.policies.storage_quota(backend) {
            self.check_storage(backend, &quota, &usage, op, report)?;
        }
        if let Some(quota) = self.policies.traffic_quota(backend) {
            self.check_traffic(backend, &quota, &usage, op, report)?;
        }
        Ok(())
    }

    fn check_storage(
        &self,
        backend: &BackendId,
        quota: &StorageQuotaPolicy,
        usage: &UsageRecord,
        op: OperationRequest,
        report: bool,
    ) -> CoreResult<()> {
        let projected_bytes = usage.projected_bytes() + op.delta_bytes;
        let projected_files = usage.projected_files() + op.delta_files;

        // Non-growing operations (reads, deletes) are never storage-rejected,
        // or a backend over a lowered quota could not be drained.
        let grows = op.delta_bytes > 0 || op.delta_files > 0;
        let bytes_exceeded = !quota.is_bytes_unbounded() && projected_bytes > quota.max_bytes;
        let files_exceeded = !quota.is_files_unbounded() && projected_files > quota.max_files;
        if grows && (bytes_exceeded || files_exceeded) {
            if report {
                self.report_storage_breach(backend, quota, op);
            }
            let (current, limit, what) = if bytes_exceeded {
                (projected_bytes, quota.max_bytes, "storage bytes")
            } else {
                (projected_files, quota.max_files, "file count")
            };
            return Err(CoreError::quota_exceeded(format!(
                "backend `{backend}` {what}: {current} > {limit}"
            )));
        }

        let warn_hit = storage_warn_level(quota, projected_bytes, projected_files);
        if report {
            if let Some((current, limit)) = warn_hit {
                self.reporter.report(Violation::new(
                    backend.clone(),
                    PolicyKind::StorageQuota,
                    Severity::Warn,
                    current,
                    limit,
                ));
            } else {
                self.reporter.resolve(backend, PolicyKind::StorageQuota);
            }
        }
        Ok(())
    }

    fn check_traffic(
        &self,
        backend: &BackendId,
        quota: &TrafficQuotaPolicy,
        usage: &UsageRecord,
        op: OperationRequest,
        report: bool,
    ) -> CoreResult<()> {
        let projected_bytes = usage.bytes_in_window + op.transfer_bytes;
        let projected_requests = usage.requests_in_window + op.requests();

        let bytes_exceeded =
            quota.max_bytes_per_window > 0 && projected_bytes > quota.max_bytes_per_window;
        let requests_exceeded = quota.max_requests_per_window > 0
            && projected_requests > quota.max_requests_per_window;
        if bytes_exceeded || requests_exceeded {
            let (current, limit, what) = if bytes_exceeded {
                (projected_bytes, quota.max_bytes_per_window, "window bytes")
            } else {
                (
                    projected_requests,
                    quota.max_requests_per_window,
                    "window requests",
                )
            };
            if report {
                self.reporter.report(Violation::new(
                    backend.clone(),
                    PolicyKind::TrafficQuota,
                    Severity::Critical,
                    current,
                    limit,
                ));
            }
            return Err(CoreError::quota_exceeded(format!(
                "backend `{backend}` {what}: {current} > {limit}"
            )));
        }

        if report {
            self.reporter.resolve(backend, PolicyKind::TrafficQuota);
        }
        Ok(())
    }

    fn report_storage_breach(
        &self,
        backend: &BackendId,
        quota: &StorageQuotaPolicy,
        op: OperationRequest,
    ) {
        let usage = self.tracker.snapshot(backend, None);
        let projected_bytes = usage.projected_bytes() + op.delta_bytes;
        let projected_files = usage.projected_files() + op.delta_files;
        let (current, limit) =
            if !quota.is_bytes_unbounded() && projected_bytes > quota.max_bytes {
                (projected_bytes, quota.max_bytes)
            } else {
                (projected_files, quota.max_files)
            };
        self.reporter.report(Violation::new(
            backend.clone(),
            PolicyKind::StorageQuota,
            Severity::Critical,
            current,
            limit,
        ));
    }
}

/// Highest warn-threshold crossing among the bounded dimensions, if any.
fn storage_warn_level(
    quota: &StorageQuotaPolicy,
    projected_bytes: u64,
    projected_files: u64,
) -> Option<(u64, u64)> {
    let mut hit = None;
    if !quota.is_bytes_unbounded() {
        let fraction = projected_bytes as f64 / quota.max_bytes as f64;
        if fraction >= quota.warn_threshold {
            hit = Some((projected_bytes, quota.max_bytes));
        }
    }
    if hit.is_none() && !quota.is_files_unbounded() {
        let fraction = projected_files as f64 / quota.max_files as f64;
        if fraction >= quota.warn_threshold {
            hit = Some((projected_files, quota.max_files));
        }
    }
    hit
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{BackendDescriptor, Policy, Severity, ViolationFilter};

    fn setup(max_bytes: u64, warn_threshold: f64) -> (QuotaEnforcer, BackendId) {
        let policies = Arc::new(PolicyStore::new());
        let tracker = Arc::new(ResourceTracker::new());
        let reporter = Arc::new(ViolationReporter::new());
        let backend = BackendId::new("s3-east");

        policies.register(BackendDescriptor::new("s3-east"));
        policies
            .set(
                &backend,
                Policy::StorageQuota(StorageQuotaPolicy {
                    max_bytes,
                    max_files: 0,
                    warn_threshold,
                }),
            )
            .unwrap();

        (QuotaEnforcer::new(policies, tracker, reporter), backend)
    }

    fn violations(enforcer: &QuotaEnforcer) -> Vec<Violation> {
        enforcer.reporter.list(&ViolationFilter::any())
    }

    #[test]
    fn test_warn_then_reject_scenario() {
        let (enforcer, backend) = setup(1000, 0.8);

        // 850 of 1000 crosses the 0.8 warn threshold but is allowed.
        let admission = enforcer
            .admit(&backend, OperationRequest::store(850))
            .unwrap();
        enforcer.commit(admission);

        let recorded = violations(&enforcer);
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].severity, Severity::Warn);
        assert_eq!(recorded[0].current_value, 850);

        // A further 200 would land at 1050 and must be rejected.
        let result = enforcer.admit(&backend, OperationRequest::store(200));
        assert!(matches!(result, Err(CoreError::QuotaExceeded { .. })));

        // Usage is unchanged by the rejected operation.
        let usage = enforcer.tracker.snapshot(&backend, None);
        assert_eq!(usage.bytes_used, 850);
        assert_eq!(usage.pending_bytes, 0);

        // The hard breach shows up as a critical violation.
        let critical: Vec<_> = violations(&enforcer)
            .into_iter()
            .filter(|v| v.severity == Severity::Critical)
            .collect();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].current_value, 1050);
        assert_eq!(critical[0].limit_value, 1000);
    }

    #[test]
    fn test_abort_releases_reservation() {
        let (enforcer, backend) = setup(1000, 0.9);

        let admission = enforcer
            .admit(&backend, OperationRequest::store(600))
            .unwrap();
        enforcer.abort(admission);

        let usage = enforcer.tracker.snapshot(&backend, None);
        assert_eq!(usage.bytes_used, 0);
        assert_eq!(usage.pending_bytes, 0);

        // Capacity is available again.
        assert!(enforcer.admit(&backend, OperationRequest::store(900)).is_ok());
    }

    #[test]
    fn test_passing_check_resolves_violations() {
        let (enforcer, backend) = setup(1000, 0.8);

        let admission = enforcer
            .admit(&backend, OperationRequest::store(850))
            .unwrap();
        enforcer.commit(admission);
        enforcer.tracker.record(&backend, UsageDelta::deleted(850), None);

        // Well below the threshold again.
        enforcer.check(&backend, OperationRequest::store(10)).unwrap();

        let unresolved = enforcer
            .reporter
            .list(&ViolationFilter::any().with_resolved(false));
        assert!(unresolved.is_empty());
    }

    #[test]
    fn test_would_accept_is_silent() {
        let (enforcer, backend) = setup(1000, 0.8);

        assert!(enforcer.would_accept(&backend, OperationRequest::store(500)));
        assert!(!enforcer.would_accept(&backend, OperationRequest::store(1500)));
        assert!(violations(&enforcer).is_empty());
    }

    #[test]
    fn test_traffic_window_rejection() {
        let policies = Arc::new(PolicyStore::new());
        let tracker = Arc::new(ResourceTracker::new());
        let reporter = Arc::new(ViolationReporter::new());
        let backend = BackendId::new("s3-east");

        policies.register(BackendDescriptor::new("s3-east"));
        policies
            .set(
                &backend,
                Policy::TrafficQuota(TrafficQuotaPolicy {
                    max_bytes_per_window: 1000,
                    window_secs: 3600,
                    max_requests_per_window: 0,
                }),
            )
            .unwrap();
        let enforcer = QuotaEnforcer::new(policies, tracker, reporter);

        let admission = enforcer
            .admit(&backend, OperationRequest::read(900))
            .unwrap();
        enforcer.commit(admission);

        let result = enforcer.check(&backend, OperationRequest::read(200));
        assert!(matches!(result, Err(CoreError::QuotaExceeded { .. })));

        let recorded = violations(&enforcer);
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].kind, PolicyKind::TrafficQuota);
        assert_eq!(recorded[0].severity, Severity::Critical);
    }

    #[test]
    fn test_no_policies_allows_everything() {
        let policies = Arc::new(PolicyStore::new());
        let tracker = Arc::new(ResourceTracker::new());
        let reporter = Arc::new(ViolationReporter::new());
        let enforcer = QuotaEnforcer::new(policies, tracker, reporter);
        let backend = BackendId::new("unmanaged");

        let admission = enforcer
            .admit(&backend, OperationRequest::store(u64::MAX / 4))
            .unwrap();
        enforcer.commit(admission);
        assert!(enforcer.check(&backend, OperationRequest::store(1)).is_ok());
    }
}
