//! Engine handle.
//!
//! `PolicyEngine` wires the policy store, resource tracker, quota enforcer,
//! tiered cache, replication coordinator, and violation reporter behind one
//! explicit handle; there is no process-wide singleton. Object operations
//! follow the enforce → I/O → settle → place → replicate flow, and an
//! optional background worker runs cache demotion, retention sweeps, and
//! state snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::adapter::BackendAdapter;
use crate::cache::{AccessOutcome, CycleReport, TieredCacheManager};
use crate::config::EngineConfig;
use crate::enforcer::{OperationRequest, QuotaEnforcer};
use crate::persist::StateStore;
use crate::policy_store::PolicyStore;
use crate::replication::{ReplicaSet, ReplicationCoordinator};
use crate::reporter::ViolationReporter;
use crate::tracker::{ResourceTracker, UsageDelta};
use strata_core::{
    BackendDescriptor, BackendId, CoreError, CoreResult, ObjectId, Policy, PolicyKind,
    UsageRecord, Violation, ViolationFilter,
};

/// Engine-side record of a stored object, kept for retention decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Backend-of-record.
    pub backend: BackendId,
    /// Stored size in bytes.
    pub size_bytes: u64,
    /// When the object was stored.
    pub stored_at: DateTime<Utc>,
}

/// Outcome of a successful store.
#[derive(Debug, Clone)]
pub struct StoreReceipt {
    /// Stored size in bytes.
    pub size_bytes: u64,
    /// Cache placement, when the backend participates in the cache.
    pub cache: Option<AccessOutcome>,
    /// Replica states, when a replication policy is active.
    pub replicas: Option<ReplicaSet>,
}

/// Outcome of one maintenance cycle.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    /// Cache promotions, demotions, and removals.
    pub cache: CycleReport,
    /// Objects past their archival age, for the caller to move to an
    /// archival backend.
    pub archive_candidates: Vec<ObjectId>,
}

/// The storage backend policy and tiered cache engine.
pub struct PolicyEngine {
    config: EngineConfig,
    policies: Arc<PolicyStore>,
    tracker: Arc<ResourceTracker>,
    reporter: Arc<ViolationReporter>,
    enforcer: Arc<QuotaEnforcer>,
    cache: Arc<TieredCacheManager>,
    replication: Arc<ReplicationCoordinator>,
    adapters: Arc<RwLock<HashMap<BackendId, Arc<dyn BackendAdapter>>>>,
    objects: Arc<RwLock<HashMap<ObjectId, ObjectRecord>>>,
    state: Option<Arc<StateStore>>,
    worker: Option<JoinHandle<()>>,
}

impl PolicyEngine {
    /// Creates an engine from the given configuration, restoring persisted
    /// policies and violations when a state path is configured.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPolicy` on invalid configuration, or an
    /// I/O error when the state file exists but cannot be read.
    pub fn new(config: EngineConfig) -> CoreResult<Self> {
        config.validate()?;

        let policies = Arc::new(PolicyStore::new());
        let tracker = Arc::new(ResourceTracker::new());
        let reporter = Arc::new(ViolationReporter::new());
        let enforcer = Arc::new(QuotaEnforcer::new(
            Arc::clone(&policies),
            Arc::clone(&tracker),
            Arc::clone(&reporter),
        ));
        let cache = Arc::new(TieredCacheManager::new(config.tiers.clone())?);
        let replication = Arc::new(ReplicationCoordinator::new(
            Arc::clone(&policies),
            Arc::clone(&enforcer),
            Arc::clone(&reporter),
            config.retry.clone(),
            config.adapter_timeout(),
        ));
        let state = config.state_path.as_ref().map(|path| Arc::new(StateStore::new(path)));

        let engine = Self {
            config,
            policies,
            tracker,
            reporter,
            enforcer,
            cache,
            replication,
            adapters: Arc::new(RwLock::new(HashMap::new())),
            objects: Arc::new(RwLock::new(HashMap::new())),
            state,
            worker: None,
        };
        engine.restore()?;
        Ok(engine)
    }

    /// Registers a backend with its adapter.
    pub fn register_backend(
        &self,
        descriptor: BackendDescriptor,
        adapter: Arc<dyn BackendAdapter>,
    ) {
        let backend = descriptor.backend_id.clone();
        info!(backend = %backend, "registering backend");
        self.policies.register(descriptor);
        self.replication
            .register_adapter(backend.clone(), Arc::clone(&adapter));
        self.adapters.write().insert(backend, adapter);
    }

    // === Policy configuration API ===

    /// Validates and installs a policy for a backend, persisting the new
    /// document set.
    ///
    /// # Errors
    ///
    /// `CoreError::InvalidPolicy` on validation failure, `CoreError::NotFound`
    /// for an unregistered backend.
    pub fn set_policy(&self, backend: &BackendId, policy: Policy) -> CoreResult<()> {
        self.policies.set(backend, policy)?;
        self.persist()
    }

    /// Returns the active policy of the given kind.
    #[must_use]
    pub fn get_policy(&self, backend: &BackendId, kind: PolicyKind) -> Option<Policy> {
        self.policies.get(backend, kind)
    }

    /// Returns all active policies for a backend.
    #[must_use]
    pub fn list_policies(&self, backend: &BackendId) -> Vec<Policy> {
        self.policies.list(backend)
    }

    /// Deactivates a policy; usage history is untouched.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when the backend or policy is missing.
    pub fn disable_policy(&self, backend: &BackendId, kind: PolicyKind) -> CoreResult<()> {
        self.policies.disable(backend, kind)?;
        self.persist()
    }

    /// Registered backend descriptors.
    #[must_use]
    pub fn backends(&self) -> Vec<BackendDescriptor> {
        self.policies.backends()
    }

    // === Usage / violation query API ===

    /// Consistent usage snapshot for a backend.
    #[must_use]
    pub fn usage(&self, backend: &BackendId) -> UsageRecord {
        self.tracker.snapshot(backend, self.window(backend))
    }

    /// Violations passing the filter, oldest first.
    #[must_use]
    pub fn violations(&self, filter: &ViolationFilter) -> Vec<Violation> {
        self.reporter.list(filter)
    }

    /// Tier currently caching the object, if any.
    #[must_use]
    pub fn cache_location(&self, object_id: &ObjectId) -> Option<String> {
        self.cache.location(object_id)
    }

    /// Replica states of the object, if replicated.
    #[must_use]
    pub fn replica_status(&self, object_id: &ObjectId) -> Option<ReplicaSet> {
        self.replication.status(object_id)
    }

    /// Engine record for a stored object.
    #[must_use]
    pub fn object(&self, object_id: &ObjectId) -> Option<ObjectRecord> {
        self.objects.read().get(object_id).cloned()
    }

    // === Object operations ===

    /// Stores an object on its backend-of-record.
    ///
    /// Flow: quota admission → bounded adapter put → size verification →
    /// usage commit → cache placement → replication. A cache that cannot
    /// admit the object is bypassed, not an error. A replication shortfall
    /// surfaces as `InsufficientRedundancy` after the primary copy is
    /// already stored and counted.
    ///
    /// # Errors
    ///
    /// `CoreError::QuotaExceeded`, `CoreError::NotFound` (unknown backend),
    /// `CoreError::AdapterTimeout`/`AdapterError`, or
    /// `CoreError::InsufficientRedundancy`.
    pub async fn store_object(
        &self,
        backend: &BackendId,
        object_id: &ObjectId,
        data: Bytes,
    ) -> CoreResult<StoreReceipt> {
        let adapter = self.adapter(backend)?;
        let size = data.len() as u64;

        let admission = self.enforcer.admit(backend, OperationRequest::store(size))?;
        let written = match timeout(self.config.adapter_timeout(), adapter.put(object_id, data.clone())).await {
            Ok(Ok(written)) => written,
            Ok(Err(err)) => {
                self.enforcer.abort(admission);
                return Err(err);
            }
            Err(_) => {
                self.enforcer.abort(admission);
                return Err(CoreError::AdapterTimeout {
                    backend: backend.to_string(),
                });
            }
        };
        if written != size {
            self.enforcer.abort(admission);
            return Err(CoreError::adapter(
                backend.as_str(),
                format!("stored {written} bytes, expected {size}"),
            ));
        }
        self.enforcer.commit(admission);

        self.objects.write().insert(
            object_id.clone(),
            ObjectRecord {
                backend: backend.clone(),
                size_bytes: size,
                stored_at: Utc::now(),
            },
        );

        let cache = self.cache_access(backend, object_id, size);

        let replicas = match self.policies.replication(backend) {
            Some(policy) => Some(
                self.replication
                    .ensure(backend, object_id, data, &policy)
                    .await?,
            ),
            None => None,
        };

        Ok(StoreReceipt {
            size_bytes: size,
            cache,
            replicas,
        })
    }

    /// Reads an object from its backend, counting the transfer and updating
    /// cache recency.
    ///
    /// # Errors
    ///
    /// `CoreError::QuotaExceeded` (traffic window), `CoreError::NotFound`,
    /// `CoreError::AdapterTimeout`/`AdapterError`.
    pub async fn read_object(
        &self,
        backend: &BackendId,
        object_id: &ObjectId,
    ) -> CoreResult<Bytes> {
        let adapter = self.adapter(backend)?;
        let size = match self.object(object_id) {
            Some(record) => record.size_bytes,
            None => self
                .stat_bounded(backend, &*adapter, object_id)
                .await?
                .ok_or_else(|| CoreError::not_found("object", object_id.as_str()))?,
        };

        let admission = self.enforcer.admit(backend, OperationRequest::read(size))?;
        let data = match timeout(self.config.adapter_timeout(), adapter.get(object_id)).await {
            Ok(Ok(data)) => data,
            Ok(Err(err)) => {
                self.enforcer.abort(admission);
                return Err(err);
            }
            Err(_) => {
                self.enforcer.abort(admission);
                return Err(CoreError::AdapterTimeout {
                    backend: backend.to_string(),
                });
            }
        };
        self.enforcer.commit(admission);

        self.cache_access(backend, object_id, size);
        Ok(data)
    }

    /// Deletes an object, honoring retention rules, freeing usage, and
    /// tearing down cache entries and replicas.
    ///
    /// # Errors
    ///
    /// `CoreError::InvalidState` when a legal hold or minimum age blocks the
    /// delete; adapter and quota errors as for the other operations.
    pub async fn delete_object(
        &self,
        backend: &BackendId,
        object_id: &ObjectId,
    ) -> CoreResult<()> {
        let record = self.object(object_id);

        if let Some(retention) = self.policies.retention(backend) {
            if retention.legal_hold {
                return Err(CoreError::invalid_state(format!(
                    "object `{object_id}` is under legal hold"
                )));
            }
            if let Some(record) = &record {
                let age = Utc::now().signed_duration_since(record.stored_at);
                let min_age = chrono::Duration::from_std(retention.min_age())
                    .unwrap_or_else(|_| chrono::Duration::max_value());
                if age < min_age {
                    return Err(CoreError::invalid_state(format!(
                        "object `{object_id}` is younger than the retention minimum"
                    )));
                }
            }
        }

        let adapter = self.adapter(backend)?;
        let admission = self.enforcer.admit(backend, OperationRequest::delete())?;
        match timeout(self.config.adapter_timeout(), adapter.delete(object_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.enforcer.abort(admission);
                return Err(err);
            }
            Err(_) => {
                self.enforcer.abort(admission);
                return Err(CoreError::AdapterTimeout {
                    backend: backend.to_string(),
                });
            }
        }
        self.enforcer.commit(admission);

        if let Some(record) = self.objects.write().remove(object_id) {
            self.tracker.record(
                backend,
                UsageDelta::deleted(record.size_bytes),
                self.window(backend),
            );
        }
        self.cache.remove(object_id);

        if let Some(set) = self.replication.delete(object_id).await {
            for replica_backend in set.verified_backends() {
                self.tracker.record(
                    &replica_backend,
                    UsageDelta::deleted(set.size_bytes),
                    self.window(&replica_backend),
                );
            }
        }
        Ok(())
    }

    /// Re-establishes redundancy for an object under its backend's
    /// replication policy.
    ///
    /// # Errors
    ///
    /// `CoreError::NotFound` when the backend has no replication policy or
    /// the object no replica set; replication errors as for `ensure`.
    pub async fn repair_object(
        &self,
        backend: &BackendId,
        object_id: &ObjectId,
    ) -> CoreResult<ReplicaSet> {
        let policy = self
            .policies
            .replication(backend)
            .ok_or_else(|| CoreError::not_found("replication policy", backend.as_str()))?;
        self.replication.repair(backend, object_id, &policy).await
    }

    /// Re-checks an object's replicas by size, marking lost copies failed.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when the object has no replica set.
    pub async fn verify_object(&self, object_id: &ObjectId) -> CoreResult<ReplicaSet> {
        self.replication.verify(object_id).await
    }

    // === Maintenance ===

    /// Runs one maintenance cycle: cache demotion sweep, retention archive
    /// scan, and a state snapshot.
    ///
    /// # Errors
    ///
    /// Returns persistence errors; sweep work itself is infallible.
    pub fn run_maintenance_cycle(&self) -> CoreResult<MaintenanceReport> {
        let started = std::time::Instant::now();
        let now = Utc::now();

        let cache = self.cache.run_cycle(now);

        let mut archive_candidates = Vec::new();
        for (object_id, record) in self.objects.read().iter() {
            let Some(retention) = self.policies.retention(&record.backend) else {
                continue;
            };
            let Some(archive_age) = retention.archive_age() else {
                continue;
            };
            let archive_age = chrono::Duration::from_std(archive_age)
                .unwrap_or_else(|_| chrono::Duration::max_value());
            if now.signed_duration_since(record.stored_at) >= archive_age {
                archive_candidates.push(object_id.clone());
            }
        }
        archive_candidates.sort();

        self.persist()?;
        debug!(
            duration_ms = started.elapsed().as_millis() as u64,
            demotions = cache.movements.len(),
            archive_candidates = archive_candidates.len(),
            "maintenance cycle complete"
        );
        Ok(MaintenanceReport {
            cache,
            archive_candidates,
        })
    }

    /// Starts the background maintenance worker.
    ///
    /// The worker runs [`run_maintenance_cycle`](Self::run_maintenance_cycle)
    /// at the configured interval.
    pub fn start_worker(&mut self) {
        if self.worker.is_some() {
            warn!("maintenance worker already running");
            return;
        }

        let engine = self.clone_for_worker();
        let interval = self.config.maintenance_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = engine.run_maintenance_cycle() {
                    error!(error = %err, "maintenance cycle failed");
                }
            }
        });

        self.worker = Some(handle);
        info!("maintenance worker started (interval: {:?})", interval);
    }

    /// Stops the worker and writes a final state snapshot.
    ///
    /// # Errors
    ///
    /// Returns persistence errors from the final snapshot.
    pub fn shutdown(&mut self) -> CoreResult<()> {
        if let Some(handle) = self.worker.take() {
            handle.abort();
            info!("maintenance worker shut down");
        }
        self.persist()
    }

    /// Writes the current policies and violation log to the state file, when
    /// one is configured.
    ///
    /// # Errors
    ///
    /// Returns I/O and serialization errors from the snapshot write.
    pub fn persist(&self) -> CoreResult<()> {
        let Some(state) = &self.state else {
            return Ok(());
        };
        state.save(self.policies.export(), self.reporter.export())
    }

    fn restore(&self) -> CoreResult<()> {
        let Some(state) = &self.state else {
            return Ok(());
        };
        if let Some(persisted) = state.load()? {
            self.policies.import(persisted.policies)?;
            self.reporter.import(persisted.violations);
            info!(path = %state.path().display(), "restored persisted state");
        }
        Ok(())
    }

    /// Cache placement for backends with an active cache policy; a full
    /// cache is bypassed rather than surfaced.
    fn cache_access(
        &self,
        backend: &BackendId,
        object_id: &ObjectId,
        size: u64,
    ) -> Option<AccessOutcome> {
        self.policies.cache(backend)?;
        match self.cache.access(object_id, size) {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                debug!(
                    object = %object_id,
                    error = %err,
                    "cache bypassed"
                );
                None
            }
        }
    }

    async fn stat_bounded(
        &self,
        backend: &BackendId,
        adapter: &dyn BackendAdapter,
        object_id: &ObjectId,
    ) -> CoreResult<Option<u64>> {
        match timeout(self.config.adapter_timeout(), adapter.stat(object_id)).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::AdapterTimeout {
                backend: backend.to_string(),
            }),
        }
    }

    fn adapter(&self, backend: &BackendId) -> CoreResult<Arc<dyn BackendAdapter>> {
        self.adapters
            .read()
            .get(backend)
            .cloned()
            .ok_or_else(|| CoreError::not_found("backend", backend.as_str()))
    }

    fn window(&self, backend: &BackendId) -> Option<std::time::Duration> {
        self.policies
            .traffic_quota(backend)
            .map(|policy| policy.window())
    }

    /// Clone sharing all component state, without the worker handle.
    fn clone_for_worker(&self) -> Self {
        Self {
            config: self.config.clone(),
            policies: Arc::clone(&self.policies),
            tracker: Arc::clone(&self.tracker),
            reporter: Arc::clone(&self.reporter),
            enforcer: Arc::clone(&self.enforcer),
            cache: Arc::clone(&self.cache),
            replication: Arc::clone(&self.replication),
            adapters: Arc::clone(&self.adapters),
            objects: Arc::clone(&self.objects),
            state: self.state.clone(),
            worker: None,
        }
    }
}
