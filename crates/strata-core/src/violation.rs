//! Policy violation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::{BackendId, ViolationId};
use crate::policy::PolicyKind;

/// Severity of a detected policy breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Threshold crossed but the hard limit still holds.
    Warn,
    /// Hard limit breached or a policy could not be satisfied.
    Critical,
}

impl Severity {
    /// Get string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warn => "warn",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "warn" => Ok(Self::Warn),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("invalid severity: {s}")),
        }
    }
}

/// A detected breach of a configured policy threshold.
///
/// Entries live in an append-only log; after creation only `resolved` flips,
/// and `current_value`/`detected_at` refresh when the same unresolved breach
/// repeats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Log entry identifier.
    pub violation_id: ViolationId,
    /// Backend the breach was detected on.
    pub backend_id: BackendId,
    /// Policy kind that was breached.
    pub kind: PolicyKind,
    /// Breach severity.
    pub severity: Severity,
    /// When the breach was (last) observed.
    pub detected_at: DateTime<Utc>,
    /// Observed value at detection time.
    pub current_value: u64,
    /// Configured limit the value was measured against.
    pub limit_value: u64,
    /// Whether a subsequent check has passed since detection.
    pub resolved: bool,
}

impl Violation {
    /// Creates an unresolved violation observed now.
    #[must_use]
    pub fn new(
        backend_id: BackendId,
        kind: PolicyKind,
        severity: Severity,
        current_value: u64,
        limit_value: u64,
    ) -> Self {
        Self {
            violation_id: ViolationId::new(),
            backend_id,
            kind,
            severity,
            detected_at: Utc::now(),
            current_value,
            limit_value,
            resolved: false,
        }
    }

    /// Returns `true` when `other` is the same unresolved breach class.
    ///
    /// Deduplication key is (backend, kind, severity).
    #[must_use]
    pub fn same_breach(&self, other: &Violation) -> bool {
        self.backend_id == other.backend_id
            && self.kind == other.kind
            && self.severity == other.severity
    }
}

/// Filter for violation queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViolationFilter {
    /// Restrict to one backend.
    pub backend: Option<BackendId>,
    /// Restrict to one severity.
    pub severity: Option<Severity>,
    /// Restrict by resolved state.
    pub resolved: Option<bool>,
}

impl ViolationFilter {
    /// Matches every violation.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Restricts the filter to one backend.
    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<BackendId>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Restricts the filter to one severity.
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Restricts the filter by resolved state.
    #[must_use]
    pub fn with_resolved(mut self, resolved: bool) -> Self {
        self.resolved = Some(resolved);
        self
    }

    /// Returns `true` when the violation passes the filter.
    #[must_use]
    pub fn accepts(&self, violation: &Violation) -> bool {
        if let Some(backend) = &self.backend {
            if &violation.backend_id != backend {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if violation.severity != severity {
                return false;
            }
        }
        if let Some(resolved) = self.resolved {
            if violation.resolved != resolved {
                return false;
            }
        }
        true
    }
}
