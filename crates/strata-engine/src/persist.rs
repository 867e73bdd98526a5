//! Versioned persistence for policy documents and the violation log.
//!
//! Both must survive process restart. Usage counters and cache placement are
//! a warm cache rebuildable from backend `stat` calls, so they are not
//! persisted; a state file with an unknown version is ignored rather than
//! trusted, degrading to a rebuild instead of silently using stale counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::policy_store::BackendPolicyDoc;
use strata_core::{CoreResult, Violation};

/// Current on-disk format version.
pub const STATE_VERSION: u32 = 1;

/// On-disk snapshot of durable engine state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    /// Format version; snapshots with another version are ignored on load.
    pub version: u32,
    /// When the snapshot was written.
    pub saved_at: DateTime<Utc>,
    /// Backend descriptors and policy documents.
    pub policies: Vec<BackendPolicyDoc>,
    /// Full violation log.
    pub violations: Vec<Violation>,
}

/// JSON state file with atomic replace semantics.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Creates a store writing to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// State file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted state.
    ///
    /// Returns `Ok(None)` when the file is absent, unreadable as the current
    /// format, or carries a different version; callers then start empty and
    /// rebuild counters via backend `stat`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::IoError` when the file exists but cannot be read.
    pub fn load(&self) -> CoreResult<Option<PersistedState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&self.path)?;
        let state: PersistedState = match serde_json::from_slice(&raw) {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "state file unreadable, starting empty"
                );
                return Ok(None);
            }
        };
        if state.version != STATE_VERSION {
            warn!(
                path = %self.path.display(),
                found = state.version,
                expected = STATE_VERSION,
                "state version mismatch, ignoring snapshot"
            );
            return Ok(None);
        }
        Ok(Some(state))
    }

    /// Writes a snapshot atomically (temp file plus rename).
    ///
    /// # Errors
    ///
    /// Returns `CoreError::IoError` or `CoreError::SerializationError` on
    /// failure; the prior snapshot is left intact.
    pub fn save(
        &self,
        policies: Vec<BackendPolicyDoc>,
        violations: Vec<Violation>,
    ) -> CoreResult<()> {
        let state = PersistedState {
            version: STATE_VERSION,
            saved_at: Utc::now(),
            policies,
            violations,
        };
        let raw = serde_json::to_vec_pretty(&state)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
