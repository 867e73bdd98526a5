//! Backend descriptors and capability declarations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::BackendId;

/// Relative cost class of a backend, used by geo-aware replica placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTier {
    /// Fast, expensive storage (local NVMe, premium object classes).
    Hot,
    /// General-purpose object storage.
    Standard,
    /// Cold archival or market-based storage.
    Archive,
}

impl CostTier {
    /// Get string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Standard => "standard",
            Self::Archive => "archive",
        }
    }
}

impl Default for CostTier {
    fn default() -> Self {
        Self::Standard
    }
}

impl fmt::Display for CostTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CostTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hot" => Ok(Self::Hot),
            "standard" => Ok(Self::Standard),
            "archive" => Ok(Self::Archive),
            _ => Err(format!("invalid cost tier: {s}")),
        }
    }
}

/// Declared capability set of a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    /// Backend can hold replica copies placed by the coordinator.
    pub supports_replication: bool,
    /// Backend supports streaming reads/writes.
    pub supports_streaming: bool,
    /// Cost class used for placement decisions.
    pub cost_tier: CostTier,
}

/// Descriptor of a configured storage backend.
///
/// Owned by the policy store for the lifetime of the configuration; policy
/// updates replace descriptors atomically, never mutate them in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Configured backend name.
    pub backend_id: BackendId,
    /// Declared capabilities.
    pub capabilities: BackendCapabilities,
}

impl BackendDescriptor {
    /// Creates a descriptor with default capabilities.
    #[must_use]
    pub fn new(backend_id: impl Into<BackendId>) -> Self {
        Self {
            backend_id: backend_id.into(),
            capabilities: BackendCapabilities::default(),
        }
    }

    /// Sets the capability set.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: BackendCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sets the cost tier.
    #[must_use]
    pub fn with_cost_tier(mut self, cost_tier: CostTier) -> Self {
        self.capabilities.cost_tier = cost_tier;
        self
    }

    /// Marks the backend as replication-capable.
    #[must_use]
    pub fn with_replication(mut self) -> Self {
        self.capabilities.supports_replication = true;
        self
    }
}
