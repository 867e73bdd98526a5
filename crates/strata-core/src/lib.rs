//! Core domain types for the Strata storage policy engine.

pub mod backend;
pub mod error;
pub mod ids;
pub mod policy;
pub mod usage;
pub mod violation;

pub use backend::{BackendCapabilities, BackendDescriptor, CostTier};
pub use error::{CoreError, CoreResult};
pub use ids::{BackendId, ObjectId, ViolationId};
pub use policy::{
    CachePolicy, Policy, PolicyKind, ReplicationPolicy, ReplicationStrategy, RetentionPolicy,
    StorageQuotaPolicy, TrafficQuotaPolicy,
};
pub use usage::UsageRecord;
pub use violation::{Severity, Violation, ViolationFilter};
