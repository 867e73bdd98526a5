use thiserror::Error;

/// Canonical error type for policy engine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Policy document failed validation and was rejected before any state change.
    #[error("invalid policy: {message}")]
    InvalidPolicy {
        /// Human-readable description of the constraint that failed.
        message: String,
    },

    /// A hard quota limit was reached and the operation was refused.
    #[error("quota exceeded: {message}")]
    QuotaExceeded {
        /// Human-readable quota violation message.
        message: String,
    },

    /// Fewer backends can accept the object than the policy's minimum redundancy.
    #[error(
        "insufficient redundancy for object `{object}`: {eligible} eligible of {required} required"
    )]
    InsufficientRedundancy {
        /// Object whose replication could not be satisfied.
        object: String,
        /// Minimum number of replicas demanded by the policy.
        required: u32,
        /// Number of backends that could accept the object.
        eligible: u32,
    },

    /// No evictable capacity remains in the cache tier.
    #[error("tier `{tier}` is full and holds no evictable entries")]
    TierFull {
        /// Name of the tier that could not admit the entry.
        tier: String,
    },

    /// Backend adapter call exceeded its time bound.
    #[error("adapter for backend `{backend}` timed out")]
    AdapterTimeout {
        /// Backend whose adapter did not respond in time.
        backend: String,
    },

    /// Backend adapter call failed.
    #[error("adapter for backend `{backend}` failed: {message}")]
    AdapterError {
        /// Backend whose adapter returned the error.
        backend: String,
        /// Underlying adapter error message.
        message: String,
    },

    /// Entity was not found.
    #[error("{entity} `{id}` was not found")]
    NotFound {
        /// Entity type name (e.g. `"backend"`).
        entity: &'static str,
        /// Identifier of the missing entity.
        id: String,
    },

    /// Operation violates current state rules (e.g. retention holds).
    #[error("invalid state: {message}")]
    InvalidState {
        /// Human-readable explanation of the invalid state.
        message: String,
    },

    /// I/O error occurred during file operations.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error occurred.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error occurred.
    #[error("deserialization error: {0}")]
    DeserializationError(String),
}

impl CoreError {
    /// Creates an `InvalidPolicy` variant.
    #[must_use]
    pub fn invalid_policy(message: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            message: message.into(),
        }
    }

    /// Creates a `QuotaExceeded` variant.
    #[must_use]
    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::QuotaExceeded {
            message: message.into(),
        }
    }

    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates an `InvalidState` variant.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an `AdapterError` variant.
    #[must_use]
    pub fn adapter(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AdapterError {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Returns `true` when retrying the adapter call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::AdapterTimeout { .. } | Self::AdapterError { .. })
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_eof() || err.is_syntax() || err.is_data() {
            Self::DeserializationError(err.to_string())
        } else {
            Self::SerializationError(err.to_string())
        }
    }
}

/// Convenient result alias for policy engine operations.
pub type CoreResult<T> = Result<T, CoreError>;
