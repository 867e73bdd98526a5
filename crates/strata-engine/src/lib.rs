//! Strata policy and tiered cache engine.
//!
//! Decides, for every object and every backend, how much capacity and traffic
//! it may consume, which cache tier holds it, when it is promoted or demoted,
//! how many redundant copies must exist and where, and when a policy is being
//! violated. Transport to concrete backends is supplied externally through
//! [`adapter::BackendAdapter`] implementations.
//!
//! An object operation enters through the quota enforcer; on allow, the
//! tiered cache manager resolves placement and may trigger the replication
//! coordinator; the resource tracker is updated; any breach lands in the
//! violation reporter. [`engine::PolicyEngine`] wires the components together
//! behind one explicit handle.

pub mod adapter;
pub mod cache;
pub mod config;
pub mod enforcer;
pub mod engine;
pub mod persist;
pub mod policy_store;
pub mod replication;
pub mod reporter;
pub mod tracker;

pub use adapter::{BackendAdapter, InjectedFault, LocalFsAdapter, MemoryAdapter};
pub use cache::{
    AccessOutcome, CacheDecision, CacheEntry, CycleReport, Evicted, TierConfig, TieredCacheManager,
};
pub use config::{EngineConfig, RetryPolicy};
pub use enforcer::{Admission, OperationRequest, QuotaEnforcer};
pub use engine::{MaintenanceReport, ObjectRecord, PolicyEngine, StoreReceipt};
pub use persist::{PersistedState, StateStore, STATE_VERSION};
pub use policy_store::{BackendPolicyDoc, PolicyEntry, PolicyStore};
pub use replication::{Replica, ReplicaSet, ReplicaStatus, ReplicationCoordinator};
pub use reporter::ViolationReporter;
pub use tracker::{Reservation, ReserveLimits, ResourceTracker, UsageDelta};
