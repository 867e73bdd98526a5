//! Backend adapter abstraction.
//!
//! The engine never assumes a specific wire protocol; the surrounding system
//! supplies one adapter per configured backend. Two implementations ship with
//! the crate: an in-memory adapter with fault injection for tests and a local
//! directory-backed adapter.

mod local;
mod memory;

pub use local::LocalFsAdapter;
pub use memory::{InjectedFault, MemoryAdapter};

use async_trait::async_trait;
use bytes::Bytes;

use strata_core::{CoreResult, ObjectId};

/// Narrow interface to one storage backend.
///
/// All implementations must be thread-safe (`Send + Sync`) and support
/// concurrent calls. Object identifiers are opaque keys.
///
/// # Error Handling
///
/// - `CoreError::NotFound` - object does not exist (`get`; `delete` is idempotent)
/// - `CoreError::AdapterError` - backend-specific failure
/// - `CoreError::IoError` - I/O failure (filesystem adapters)
///
/// Callers bound every adapter call with a timeout; adapters themselves do
/// not retry.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Store an object, overwriting any previous version.
    ///
    /// Returns the stored size in bytes.
    async fn put(&self, object_id: &ObjectId, data: Bytes) -> CoreResult<u64>;

    /// Retrieve the complete object data.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the object does not exist.
    async fn get(&self, object_id: &ObjectId) -> CoreResult<Bytes>;

    /// Delete an object. Deleting a missing object is a no-op.
    async fn delete(&self, object_id: &ObjectId) -> CoreResult<()>;

    /// Return the stored size without transferring data, or `None` when the
    /// object does not exist.
    async fn stat(&self, object_id: &ObjectId) -> CoreResult<Option<u64>>;
}
