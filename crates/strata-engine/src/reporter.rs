//! Violation aggregation and query.
//!
//! Append-only log of policy breaches. Repeated breaches of the same
//! (backend, kind, severity) class refresh the existing unresolved record
//! instead of appending duplicates, so operators see one live entry per
//! ongoing problem.

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, warn};

use strata_core::{BackendId, PolicyKind, Severity, Violation, ViolationFilter};

/// Append-only violation log.
pub struct ViolationReporter {
    log: RwLock<Vec<Violation>>,
}

impl ViolationReporter {
    /// Creates an empty reporter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            log: RwLock::new(Vec::new()),
        }
    }

    /// Records a breach, deduplicating against unresolved entries.
    pub fn report(&self, violation: Violation) {
        let mut log = self.log.write();
        if let Some(existing) = log
            .iter_mut()
            .find(|entry| !entry.resolved && entry.same_breach(&violation))
        {
            existing.current_value = violation.current_value;
            existing.limit_value = violation.limit_value;
            existing.detected_at = Utc::now();
            return;
        }

        warn!(
            backend = %violation.backend_id,
            kind = %violation.kind,
            severity = %violation.severity,
            current = violation.current_value,
            limit = violation.limit_value,
            "policy violation detected"
        );
        log.push(violation);
    }

    /// Marks unresolved records of the given (backend, kind) resolved.
    ///
    /// Called when a subsequent check passes; covers both severities.
    pub fn resolve(&self, backend: &BackendId, kind: PolicyKind) {
        let mut log = self.log.write();
        for entry in log
            .iter_mut()
            .filter(|entry| !entry.resolved && &entry.backend_id == backend && entry.kind == kind)
        {
            entry.resolved = true;
            debug!(
                backend = %backend,
                kind = %kind,
                severity = %entry.severity,
                "violation resolved"
            );
        }
    }

    /// Returns violations passing the filter, oldest first.
    #[must_use]
    pub fn list(&self, filter: &ViolationFilter) -> Vec<Violation> {
        let log = self.log.read();
        let mut matches: Vec<_> = log
            .iter()
            .filter(|entry| filter.accepts(entry))
            .cloned()
            .collect();
        matches.sort_by_key(|entry| entry.detected_at);
        matches
    }

    /// Returns `true` when an unresolved breach of the class exists.
    #[must_use]
    pub fn has_unresolved(&self, backend: &BackendId, kind: PolicyKind, severity: Severity) -> bool {
        self.log.read().iter().any(|entry| {
            !entry.resolved
                && &entry.backend_id == backend
                && entry.kind == kind
                && entry.severity == severity
        })
    }

    /// Exports the full log for persistence.
    #[must_use]
    pub fn export(&self) -> Vec<Violation> {
        self.log.read().clone()
    }

    /// Replaces the log with persisted entries.
    pub fn import(&self, violations: Vec<Violation>) {
        *self.log.write() = violations;
    }
}

impl Default for ViolationReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breach(severity: Severity, current: u64) -> Violation {
        Violation::new(
            BackendId::new("s3-east"),
            PolicyKind::StorageQuota,
            severity,
            current,
            1000,
        )
    }

    #[test]
    fn test_dedup_updates_existing_unresolved() {
        let reporter = ViolationReporter::new();

        reporter.report(breach(Severity::Warn, 850));
        reporter.report(breach(Severity::Warn, 920));

        let all = reporter.list(&ViolationFilter::any());
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].current_value, 920);
        assert!(!all[0].resolved);
    }

    #[test]
    fn test_severities_are_distinct_classes() {
        let reporter = ViolationReporter::new();

        reporter.report(breach(Severity::Warn, 850));
        reporter.report(breach(Severity::Critical, 1100));

        assert_eq!(reporter.list(&ViolationFilter::any()).len(), 2);
    }

    #[test]
    fn test_resolve_then_new_breach_appends() {
        let reporter = ViolationReporter::new();
        let backend = BackendId::new("s3-east");

        reporter.report(breach(Severity::Warn, 850));
        reporter.resolve(&backend, PolicyKind::StorageQuota);
        assert!(!reporter.has_unresolved(&backend, PolicyKind::StorageQuota, Severity::Warn));

        reporter.report(breach(Severity::Warn, 900));

        let all = reporter.list(&ViolationFilter::any());
        assert_eq!(all.len(), 2);
        assert!(all[0].resolved);
        assert!(!all[1].resolved);
    }

    #[test]
    fn test_list_filters_and_orders_oldest_first() {
        let reporter = ViolationReporter::new();

        let mut first = breach(Severity::Warn, 850);
        first.detected_at = Utc::now() - chrono::Duration::minutes(5);
        reporter.import(vec![first]);
        reporter.report(breach(Severity::Critical, 1100));

        let all = reporter.list(&ViolationFilter::any());
        assert_eq!(all.len(), 2);
        assert!(all[0].detected_at <= all[1].detected_at);
        assert_eq!(all[0].severity, Severity::Warn);

        let critical = reporter.list(&ViolationFilter::any().with_severity(Severity::Critical));
        assert_eq!(critical.len(), 1);

        let other = reporter.list(&ViolationFilter::any().with_backend("s3-west"));
        assert!(other.is_empty());
    }

    #[test]
    fn test_export_import_roundtrip() {
        let reporter = ViolationReporter::new();
        reporter.report(breach(Severity::Warn, 850));

        let restored = ViolationReporter::new();
        restored.import(reporter.export());
        assert_eq!(restored.list(&ViolationFilter::any()).len(), 1);
    }
}
