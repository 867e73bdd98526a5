//! Policy document store.
//!
//! Holds the registered backend descriptors and the current policy document
//! set, keyed by backend and policy kind. Pure data plus validation; the
//! store never calls other components.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use strata_core::{
    BackendDescriptor, BackendId, CachePolicy, CoreError, CoreResult, Policy, PolicyKind,
    ReplicationPolicy, RetentionPolicy, StorageQuotaPolicy, TrafficQuotaPolicy,
};

/// One policy slot: the document plus its activation flag.
///
/// Disabling keeps the document (and all usage history elsewhere) intact;
/// `get`/`list` simply stop returning it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEntry {
    /// The stored document.
    pub policy: Policy,
    /// Whether the policy is currently active.
    pub enabled: bool,
}

/// Serializable snapshot of one backend's configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendPolicyDoc {
    /// Backend descriptor.
    pub descriptor: BackendDescriptor,
    /// All policy slots, including disabled ones.
    pub policies: Vec<PolicyEntry>,
}

#[derive(Debug, Clone)]
struct BackendState {
    descriptor: BackendDescriptor,
    policies: HashMap<PolicyKind, PolicyEntry>,
}

/// In-memory policy store.
pub struct PolicyStore {
    backends: RwLock<HashMap<BackendId, BackendState>>,
}

impl PolicyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a backend, replacing the descriptor atomically when it
    /// already exists. Existing policies are preserved.
    pub fn register(&self, descriptor: BackendDescriptor) {
        let mut backends = self.backends.write();
        backends
            .entry(descriptor.backend_id.clone())
            .and_modify(|state| state.descriptor = descriptor.clone())
            .or_insert_with(|| BackendState {
                descriptor,
                policies: HashMap::new(),
            });
    }

    /// Returns the descriptor of a registered backend.
    #[must_use]
    pub fn descriptor(&self, backend: &BackendId) -> Option<BackendDescriptor> {
        self.backends
            .read()
            .get(backend)
            .map(|state| state.descriptor.clone())
    }

    /// Returns all registered backend descriptors.
    #[must_use]
    pub fn backends(&self) -> Vec<BackendDescriptor> {
        let mut descriptors: Vec<_> = self
            .backends
            .read()
            .values()
            .map(|state| state.descriptor.clone())
            .collect();
        descriptors.sort_by(|a, b| a.backend_id.cmp(&b.backend_id));
        descriptors
    }

    /// Validates and stores a policy, replacing the prior document of the
    /// same kind for that backend atomically.
    ///
    /// # Errors
    ///
    /// - `CoreError::InvalidPolicy` when validation fails; no state changes.
    /// - `CoreError::NotFound` when the backend is not registered.
    pub fn set(&self, backend: &BackendId, policy: Policy) -> CoreResult<()> {
        policy.validate()?;

        let mut backends = self.backends.write();
        let state = backends
            .get_mut(backend)
            .ok_or_else(|| CoreError::not_found("backend", backend.as_str()))?;
        state.policies.insert(
            policy.kind(),
            PolicyEntry {
                policy,
                enabled: true,
            },
        );
        Ok(())
    }

    /// Returns the active policy of the given kind, or `None` when not
    /// configured or disabled.
    #[must_use]
    pub fn get(&self, backend: &BackendId, kind: PolicyKind) -> Option<Policy> {
        self.backends
            .read()
            .get(backend)?
            .policies
            .get(&kind)
            .filter(|entry| entry.enabled)
            .map(|entry| entry.policy.clone())
    }

    /// Deactivates a policy without deleting the document.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when the backend or policy is missing.
    pub fn disable(&self, backend: &BackendId, kind: PolicyKind) -> CoreResult<()> {
        let mut backends = self.backends.write();
        let state = backends
            .get_mut(backend)
            .ok_or_else(|| CoreError::not_found("backend", backend.as_str()))?;
        let entry = state
            .policies
            .get_mut(&kind)
            .ok_or_else(|| CoreError::not_found("policy", kind.as_str()))?;
        entry.enabled = false;
        Ok(())
    }

    /// Returns the full set of active policies for a backend.
    #[must_use]
    pub fn list(&self, backend: &BackendId) -> Vec<Policy> {
        let backends = self.backends.read();
        let Some(state) = backends.get(backend) else {
            return Vec::new();
        };
        let mut policies: Vec<_> = state
            .policies
            .values()
            .filter(|entry| entry.enabled)
            .map(|entry| entry.policy.clone())
            .collect();
        policies.sort_by_key(|policy| policy.kind().as_str());
        policies
    }

    /// Active storage quota for a backend, if any.
    #[must_use]
    pub fn storage_quota(&self, backend: &BackendId) -> Option<StorageQuotaPolicy> {
        match self.get(backend, PolicyKind::StorageQuota) {
            Some(Policy::StorageQuota(p)) => Some(p),
            _ => None,
        }
    }

    /// Active traffic quota for a backend, if any.
    #[must_use]
    pub fn traffic_quota(&self, backend: &BackendId) -> Option<TrafficQuotaPolicy> {
        match self.get(backend, PolicyKind::TrafficQuota) {
            Some(Policy::TrafficQuota(p)) => Some(p),
            _ => None,
        }
    }

    /// Active replication policy for a backend, if any.
    #[must_use]
    pub fn replication(&self, backend: &BackendId) -> Option<ReplicationPolicy> {
        match self.get(backend, PolicyKind::Replication) {
            Some(Policy::Replication(p)) => Some(p),
            _ => None,
        }
    }

    /// Active retention policy for a backend, if any.
    #[must_use]
    pub fn retention(&self, backend: &BackendId) -> Option<RetentionPolicy> {
        match self.get(backend, PolicyKind::Retention) {
            Some(Policy::Retention(p)) => Some(p),
            _ => None,
        }
    }

    /// Active cache policy for a backend, if any.
    #[must_use]
    pub fn cache(&self, backend: &BackendId) -> Option<CachePolicy> {
        match self.get(backend, PolicyKind::Cache) {
            Some(Policy::Cache(p)) => Some(p),
            _ => None,
        }
    }

    /// Exports the full configuration for persistence.
    #[must_use]
    pub fn export(&self) -> Vec<BackendPolicyDoc> {
        let backends = self.backends.read();
        let mut docs: Vec<_> = backends
            .values()
            .map(|state| {
                let mut policies: Vec<_> = state.policies.values().cloned().collect();
                policies.sort_by_key(|entry| entry.policy.kind().as_str());
                BackendPolicyDoc {
                    descriptor: state.descriptor.clone(),
                    policies,
                }
            })
            .collect();
        docs.sort_by(|a, b| a.descriptor.backend_id.cmp(&b.descriptor.backend_id));
        docs
    }

    /// Replaces the store contents with a persisted configuration.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPolicy` when any document fails validation;
    /// the store is left unchanged in that case.
    pub fn import(&self, docs: Vec<BackendPolicyDoc>) -> CoreResult<()> {
        for doc in &docs {
            for entry in &doc.policies {
                entry.policy.validate()?;
            }
        }

        let mut backends = self.backends.write();
        backends.clear();
        for doc in docs {
            let policies = doc
                .policies
                .into_iter()
                .map(|entry| (entry.policy.kind(), entry))
                .collect();
            backends.insert(
                doc.descriptor.backend_id.clone(),
                BackendState {
                    descriptor: doc.descriptor,
                    policies,
                },
            );
        }
        Ok(())
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::ReplicationStrategy;

    fn store_with_backend(name: &str) -> PolicyStore {
        let store = PolicyStore::new();
        store.register(BackendDescriptor::new(name));
        store
    }

    #[test]
    fn test_set_and_get() {
        let store = store_with_backend("s3-east");
        let backend = BackendId::new("s3-east");

        store
            .set(
                &backend,
                Policy::StorageQuota(StorageQuotaPolicy {
                    max_bytes: 1000,
                    max_files: 10,
                    warn_threshold: 0.8,
                }),
            )
            .unwrap();

        let quota = store.storage_quota(&backend).unwrap();
        assert_eq!(quota.max_bytes, 1000);
        assert!(store.get(&backend, PolicyKind::TrafficQuota).is_none());
    }

    #[test]
    fn test_set_rejects_invalid_policy() {
        let store = store_with_backend("s3-east");
        let backend = BackendId::new("s3-east");

        let result = store.set(
            &backend,
            Policy::StorageQuota(StorageQuotaPolicy {
                max_bytes: 1000,
                max_files: 10,
                warn_threshold: 2.0,
            }),
        );
        assert!(matches!(result, Err(CoreError::InvalidPolicy { .. })));
        assert!(store.storage_quota(&backend).is_none());
    }

    #[test]
    fn test_set_unregistered_backend() {
        let store = PolicyStore::new();
        let result = store.set(
            &BackendId::new("ghost"),
            Policy::Retention(RetentionPolicy::default()),
        );
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
    }

    #[test]
    fn test_set_replaces_same_kind() {
        let store = store_with_backend("s3-east");
        let backend = BackendId::new("s3-east");

        for max_bytes in [1000, 2000] {
            store
                .set(
                    &backend,
                    Policy::StorageQuota(StorageQuotaPolicy {
                        max_bytes,
                        max_files: 0,
                        warn_threshold: 0.8,
                    }),
                )
                .unwrap();
        }

        assert_eq!(store.storage_quota(&backend).unwrap().max_bytes, 2000);
        assert_eq!(store.list(&backend).len(), 1);
    }

    #[test]
    fn test_disable_hides_but_keeps_document() {
        let store = store_with_backend("s3-east");
        let backend = BackendId::new("s3-east");

        store
            .set(&backend, Policy::Retention(RetentionPolicy::default()))
            .unwrap();
        store.disable(&backend, PolicyKind::Retention).unwrap();

        assert!(store.get(&backend, PolicyKind::Retention).is_none());
        assert!(store.list(&backend).is_empty());

        // The document survives in exports.
        let docs = store.export();
        assert_eq!(docs[0].policies.len(), 1);
        assert!(!docs[0].policies[0].enabled);
    }

    #[test]
    fn test_export_import_roundtrip() {
        let store = store_with_backend("s3-east");
        let backend = BackendId::new("s3-east");
        store
            .set(
                &backend,
                Policy::Replication(ReplicationPolicy {
                    strategy: ReplicationStrategy::GeoAware,
                    min_redundancy: 2,
                    max_redundancy: 3,
                    preferred_backends: vec![BackendId::new("a"), BackendId::new("b")],
                }),
            )
            .unwrap();

        let restored = PolicyStore::new();
        restored.import(store.export()).unwrap();

        assert_eq!(restored.replication(&backend).unwrap().min_redundancy, 2);
        assert_eq!(restored.backends().len(), 1);
    }
}
