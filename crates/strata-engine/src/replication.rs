//! Replica placement and repair.
//!
//! Given a replication policy, the coordinator selects the target backend
//! set, drives copy and verify operations through the backend adapters, and
//! repairs failed replicas. Copies run concurrently across targets; all work
//! for one object is sequenced behind a per-object guard, so a second
//! `ensure`/`repair` call for the same object waits for the first.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::adapter::BackendAdapter;
use crate::config::RetryPolicy;
use crate::enforcer::{OperationRequest, QuotaEnforcer};
use crate::policy_store::PolicyStore;
use crate::reporter::ViolationReporter;
use strata_core::{
    BackendId, CoreError, CoreResult, ObjectId, PolicyKind, ReplicationPolicy,
    ReplicationStrategy, Severity, Violation,
};

/// Lifecycle state of one replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaStatus {
    /// Copy scheduled but not yet confirmed.
    Pending,
    /// Copy confirmed present with the expected size.
    Verified,
    /// Copy attempt errored or verification mismatched.
    Failed,
}

impl ReplicaStatus {
    /// Get string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Failed => "failed",
        }
    }
}

/// One replica of an object on one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replica {
    /// Backend holding (or failing to hold) the copy.
    pub backend: BackendId,
    /// Current state.
    pub status: ReplicaStatus,
    /// Error message of the most recent failure, if any.
    pub last_error: Option<String>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
}

/// Replica states of one object across backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSet {
    /// Replicated object.
    pub object_id: ObjectId,
    /// Object size used for verification.
    pub size_bytes: u64,
    /// Replicas in target-selection order.
    pub replicas: Vec<Replica>,
}

impl ReplicaSet {
    fn new(object_id: ObjectId, size_bytes: u64) -> Self {
        Self {
            object_id,
            size_bytes,
            replicas: Vec::new(),
        }
    }

    /// Number of verified replicas.
    #[must_use]
    pub fn verified_count(&self) -> u32 {
        self.count(ReplicaStatus::Verified)
    }

    /// Number of pending replicas.
    #[must_use]
    pub fn pending_count(&self) -> u32 {
        self.count(ReplicaStatus::Pending)
    }

    /// Number of failed replicas.
    #[must_use]
    pub fn failed_count(&self) -> u32 {
        self.count(ReplicaStatus::Failed)
    }

    /// Replica on the given backend, if any.
    #[must_use]
    pub fn replica(&self, backend: &BackendId) -> Option<&Replica> {
        self.replicas.iter().find(|r| &r.backend == backend)
    }

    /// Backends currently holding a verified copy.
    #[must_use]
    pub fn verified_backends(&self) -> Vec<BackendId> {
        self.replicas
            .iter()
            .filter(|r| r.status == ReplicaStatus::Verified)
            .map(|r| r.backend.clone())
            .collect()
    }

    fn count(&self, status: ReplicaStatus) -> u32 {
        self.replicas.iter().filter(|r| r.status == status).count() as u32
    }

    fn set_status(&mut self, backend: &BackendId, status: ReplicaStatus, error: Option<String>) {
        let now = Utc::now();
        if let Some(replica) = self.replicas.iter_mut().find(|r| &r.backend == backend) {
            replica.status = status;
            replica.last_error = error;
            replica.updated_at = now;
        } else {
            self.replicas.push(Replica {
                backend: backend.clone(),
                status,
                last_error: error,
                updated_at: now,
            });
        }
    }
}

/// Drives copy, verify, and repair operations against backend adapters.
pub struct ReplicationCoordinator {
    adapters: RwLock<HashMap<BackendId, Arc<dyn BackendAdapter>>>,
    policies: Arc<PolicyStore>,
    enforcer: Arc<QuotaEnforcer>,
    reporter: Arc<ViolationReporter>,
    retry: RetryPolicy,
    op_timeout: Duration,
    sets: RwLock<HashMap<ObjectId, ReplicaSet>>,
    guards: Mutex<HashMap<ObjectId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ReplicationCoordinator {
    /// Creates a coordinator with the given retry bounds and per-call
    /// timeout.
    #[must_use]
    pub fn new(
        policies: Arc<PolicyStore>,
        enforcer: Arc<QuotaEnforcer>,
        reporter: Arc<ViolationReporter>,
        retry: RetryPolicy,
        op_timeout: Duration,
    ) -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            policies,
            enforcer,
            reporter,
            retry,
            op_timeout,
            sets: RwLock::new(HashMap::new()),
            guards: Mutex::new(HashMap::new()),
        }
    }

    /// Registers the adapter for a backend.
    pub fn register_adapter(&self, backend: BackendId, adapter: Arc<dyn BackendAdapter>) {
        self.adapters.write().insert(backend, adapter);
    }

    /// Current replica states of an object.
    #[must_use]
    pub fn status(&self, object_id: &ObjectId) -> Option<ReplicaSet> {
        self.sets.read().get(object_id).cloned()
    }

    /// Establishes at least `min_redundancy` verified replicas of the
    /// object, preferring backends in policy order.
    ///
    /// `source` is the backend whose replication policy governs the object;
    /// shortfalls are attributed to it in the violation log. Backends whose
    /// quota check rejects the object, that have no adapter, or that do not
    /// declare replication support are skipped. Extras up to
    /// `max_redundancy` are added opportunistically; their absence is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InsufficientRedundancy` (and records a critical
    /// violation) when fewer than `min_redundancy` backends can accept the
    /// object.
    pub async fn ensure(
        &self,
        source: &BackendId,
        object_id: &ObjectId,
        data: Bytes,
        policy: &ReplicationPolicy,
    ) -> CoreResult<ReplicaSet> {
        let guard = self.object_guard(object_id);
        let _sequenced = guard.lock().await;
        self.ensure_locked(source, object_id, data, policy).await
    }

    /// Re-establishes redundancy after replica failures.
    ///
    /// Idempotent: with `min_redundancy` already verified and nothing
    /// pending or failed, this does nothing. Otherwise the object bytes are
    /// re-read from a verified replica and `ensure` selection re-runs,
    /// retrying failed targets and adding new ones as capacity allows.
    ///
    /// # Errors
    ///
    /// - `CoreError::NotFound` when the object has no replica set.
    /// - `CoreError::InvalidState` when no verified replica can supply the
    ///   bytes.
    /// - `CoreError::InsufficientRedundancy` as for `ensure`.
    pub async fn repair(
        &self,
        source: &BackendId,
        object_id: &ObjectId,
        policy: &ReplicationPolicy,
    ) -> CoreResult<ReplicaSet> {
        let guard = self.object_guard(object_id);
        let _sequenced = guard.lock().await;

        let set = self
            .status(object_id)
            .ok_or_else(|| CoreError::not_found("replica set", object_id.as_str()))?;

        if set.verified_count() >= policy.min_redundancy
            && set.pending_count() == 0
            && set.failed_count() == 0
        {
            return Ok(set);
        }

        let data = self.read_from_verified(&set).await?;
        info!(object = %object_id, "repairing replica set");
        self.ensure_locked(source, object_id, data, policy).await
    }

    /// Re-checks verified replicas against their backends by size.
    ///
    /// Copies that are missing or mismatched are marked failed so a later
    /// `repair` re-establishes them. Adapter errors and timeouts leave the
    /// replica state untouched: an unreachable backend means capacity
    /// unknown, not a lost copy.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when the object has no replica set.
    pub async fn verify(&self, object_id: &ObjectId) -> CoreResult<ReplicaSet> {
        let guard = self.object_guard(object_id);
        let _sequenced = guard.lock().await;

        let set = self
            .status(object_id)
            .ok_or_else(|| CoreError::not_found("replica set", object_id.as_str()))?;

        let mut failures = Vec::new();
        for replica in set
            .replicas
            .iter()
            .filter(|r| r.status == ReplicaStatus::Verified)
        {
            let Some(adapter) = self.adapter(&replica.backend) else {
                continue;
            };
            match timeout(self.op_timeout, adapter.stat(object_id)).await {
                Ok(Ok(Some(size))) if size == set.size_bytes => {}
                Ok(Ok(found)) => {
                    warn!(
                        object = %object_id,
                        backend = %replica.backend,
                        ?found,
                        expected = set.size_bytes,
                        "replica verification mismatch"
                    );
                    failures.push((
                        replica.backend.clone(),
                        format!("stat {found:?}, expected {}", set.size_bytes),
                    ));
                }
                Ok(Err(err)) => {
                    debug!(
                        object = %object_id,
                        backend = %replica.backend,
                        error = %err,
                        "replica verification inconclusive"
                    );
                }
                Err(_) => {
                    debug!(
                        object = %object_id,
                        backend = %replica.backend,
                        "replica verification timed out"
                    );
                }
            }
        }

        let mut sets = self.sets.write();
        let set = sets
            .get_mut(object_id)
            .ok_or_else(|| CoreError::not_found("replica set", object_id.as_str()))?;
        for (backend, message) in failures {
            set.set_status(&backend, ReplicaStatus::Failed, Some(message));
        }
        Ok(set.clone())
    }

    /// Deletes the object from every replica backend and destroys the set.
    ///
    /// Adapter deletes are best-effort and bounded; failures are logged and
    /// do not abort the removal of the set.
    pub async fn delete(&self, object_id: &ObjectId) -> Option<ReplicaSet> {
        let guard = self.object_guard(object_id);
        let _sequenced = guard.lock().await;

        let set = self.sets.write().remove(object_id)?;
        for replica in &set.replicas {
            if replica.status != ReplicaStatus::Verified {
                continue;
            }
            let Some(adapter) = self.adapter(&replica.backend) else {
                continue;
            };
            match timeout(self.op_timeout, adapter.delete(object_id)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(
                        object = %object_id,
                        backend = %replica.backend,
                        error = %err,
                        "replica delete failed"
                    );
                }
                Err(_) => {
                    warn!(
                        object = %object_id,
                        backend = %replica.backend,
                        "replica delete timed out"
                    );
                }
            }
        }
        self.guards.lock().remove(object_id);
        Some(set)
    }

    /// Drops replica state without touching the backends.
    pub fn forget(&self, object_id: &ObjectId) {
        self.sets.write().remove(object_id);
        self.guards.lock().remove(object_id);
    }

    async fn ensure_locked(
        &self,
        source: &BackendId,
        object_id: &ObjectId,
        data: Bytes,
        policy: &ReplicationPolicy,
    ) -> CoreResult<ReplicaSet> {
        let size = data.len() as u64;
        let existing = self
            .status(object_id)
            .unwrap_or_else(|| ReplicaSet::new(object_id.clone(), size));
        let verified: HashSet<BackendId> = existing.verified_backends().into_iter().collect();

        // Target selection: preference order (or cost-tier spread), skipping
        // ineligible backends, until max_redundancy targets are accounted for.
        let mut targets = Vec::new();
        for candidate in self.order_candidates(policy) {
            if verified.len() as u32 + targets.len() as u32 >= policy.max_redundancy {
                break;
            }
            if verified.contains(&candidate) {
                continue;
            }
            if self.adapter(&candidate).is_none() {
                debug!(backend = %candidate, "skipping target without adapter");
                continue;
            }
            if let Some(descriptor) = self.policies.descriptor(&candidate) {
                if !descriptor.capabilities.supports_replication {
                    debug!(backend = %candidate, "skipping non-replicating target");
                    continue;
                }
            }
            if !self
                .enforcer
                .would_accept(&candidate, OperationRequest::store(size))
            {
                debug!(backend = %candidate, "skipping target over quota");
                continue;
            }
            targets.push(candidate);
        }

        let eligible = verified.len() as u32 + targets.len() as u32;
        if eligible < policy.min_redundancy {
            self.reporter.report(Violation::new(
                source.clone(),
                PolicyKind::Replication,
                Severity::Critical,
                u64::from(eligible),
                u64::from(policy.min_redundancy),
            ));
            return Err(CoreError::InsufficientRedundancy {
                object: object_id.to_string(),
                required: policy.min_redundancy,
                eligible,
            });
        }

        // Mark the whole wave pending before any copy starts, so a crash or
        // cancellation never leaves an untracked copy behind.
        {
            let mut sets = self.sets.write();
            let set = sets
                .entry(object_id.clone())
                .or_insert_with(|| ReplicaSet::new(object_id.clone(), size));
            set.size_bytes = size;
            for target in &targets {
                set.set_status(target, ReplicaStatus::Pending, None);
            }
        }

        // Copies run concurrently across targets.
        let copies = targets.iter().map(|target| {
            let data = data.clone();
            async move {
                let result = self.copy_replica(target, object_id, data, size).await;
                (target.clone(), result)
            }
        });
        let results = join_all(copies).await;

        let outcome = {
            let mut sets = self.sets.write();
            let set = sets
                .entry(object_id.clone())
                .or_insert_with(|| ReplicaSet::new(object_id.clone(), size));
            for (backend, result) in results {
                match result {
                    Ok(()) => set.set_status(&backend, ReplicaStatus::Verified, None),
                    Err(err) => {
                        warn!(
                            object = %object_id,
                            backend = %backend,
                            error = %err,
                            "replica copy failed"
                        );
                        set.set_status(&backend, ReplicaStatus::Failed, Some(err.to_string()));
                    }
                }
            }
            set.clone()
        };

        if outcome.verified_count() >= policy.min_redundancy {
            self.reporter.resolve(source, PolicyKind::Replication);
        } else {
            self.reporter.report(Violation::new(
                source.clone(),
                PolicyKind::Replication,
                Severity::Critical,
                u64::from(outcome.verified_count()),
                u64::from(policy.min_redundancy),
            ));
        }

        Ok(outcome)
    }

    /// Copies one replica with bounded retries and verifies it by size.
    ///
    /// The storage admission is settled exactly once: committed on verified
    /// success, aborted on final failure, so failed copies are never counted
    /// as usage.
    async fn copy_replica(
        &self,
        backend: &BackendId,
        object_id: &ObjectId,
        data: Bytes,
        size: u64,
    ) -> CoreResult<()> {
        let adapter = self
            .adapter(backend)
            .ok_or_else(|| CoreError::not_found("adapter", backend.as_str()))?;
        let admission = self.enforcer.admit(backend, OperationRequest::store(size))?;

        let mut attempt = 0;
        let error = loop {
            match self.put_and_verify(&*adapter, backend, object_id, &data, size).await {
                Ok(()) => {
                    self.enforcer.commit(admission);
                    debug!(object = %object_id, backend = %backend, "replica verified");
                    return Ok(());
                }
                Err(err) => {
                    attempt += 1;
                    if !err.is_transient() || attempt >= self.retry.max_attempts {
                        break err;
                    }
                    let backoff = self.retry.backoff(attempt - 1);
                    debug!(
                        object = %object_id,
                        backend = %backend,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "retrying replica copy"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        };

        self.enforcer.abort(admission);
        Err(error)
    }

    async fn put_and_verify(
        &self,
        adapter: &dyn BackendAdapter,
        backend: &BackendId,
        object_id: &ObjectId,
        data: &Bytes,
        size: u64,
    ) -> CoreResult<()> {
        let written = match timeout(self.op_timeout, adapter.put(object_id, data.clone())).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(CoreError::AdapterTimeout {
                    backend: backend.to_string(),
                })
            }
        };

        let stat = match timeout(self.op_timeout, adapter.stat(object_id)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(CoreError::AdapterTimeout {
                    backend: backend.to_string(),
                })
            }
        };

        if written != size || stat != Some(size) {
            return Err(CoreError::adapter(
                backend.as_str(),
                format!(
                    "verification mismatch: wrote {written}, stat {stat:?}, expected {size}"
                ),
            ));
        }
        Ok(())
    }

    /// Reads the object bytes back from any verified replica.
    async fn read_from_verified(&self, set: &ReplicaSet) -> CoreResult<Bytes> {
        for backend in set.verified_backends() {
            let Some(adapter) = self.adapter(&backend) else {
                continue;
            };
            match timeout(self.op_timeout, adapter.get(&set.object_id)).await {
                Ok(Ok(data)) => return Ok(data),
                Ok(Err(err)) => {
                    warn!(
                        object = %set.object_id,
                        backend = %backend,
                        error = %err,
                        "verified replica unreadable"
                    );
                }
                Err(_) => {
                    warn!(
                        object = %set.object_id,
                        backend = %backend,
                        "verified replica read timed out"
                    );
                }
            }
        }
        Err(CoreError::invalid_state(format!(
            "no verified replica of `{}` is readable",
            set.object_id
        )))
    }

    /// Candidate order: declared preference, or one backend per distinct
    /// cost tier first for the geo-aware strategy.
    fn order_candidates(&self, policy: &ReplicationPolicy) -> Vec<BackendId> {
        match policy.strategy {
            ReplicationStrategy::Simple => policy.preferred_backends.clone(),
            ReplicationStrategy::GeoAware => {
                let mut spread = Vec::new();
                let mut rest = Vec::new();
                let mut seen_tiers = HashSet::new();
                for backend in &policy.preferred_backends {
                    let cost_tier = self
                        .policies
                        .descriptor(backend)
                        .map(|d| d.capabilities.cost_tier);
                    match cost_tier {
                        Some(tier) if seen_tiers.insert(tier) => spread.push(backend.clone()),
                        _ => rest.push(backend.clone()),
                    }
                }
                spread.extend(rest);
                spread
            }
        }
    }

    fn adapter(&self, backend: &BackendId) -> Option<Arc<dyn BackendAdapter>> {
        self.adapters.read().get(backend).cloned()
    }

    fn object_guard(&self, object_id: &ObjectId) -> Arc<tokio::sync::Mutex<()>> {
        let mut guards = self.guards.lock();
        Arc::clone(
            guards
                .entry(object_id.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}
