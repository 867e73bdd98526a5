//! In-memory backend adapter with configurable fault injection.
//!
//! Simulates a backend for tests: deterministic failure sequences, timeout
//! injection, and optional latency, without any external dependency.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use super::BackendAdapter;
use strata_core::{CoreError, CoreResult, ObjectId};

/// Fault pattern consumed by the next adapter call.
#[derive(Debug, Clone)]
pub enum InjectedFault {
    /// Call fails with a retryable adapter error.
    Transient(&'static str),
    /// Call fails as if the time bound elapsed.
    Timeout,
    /// Call succeeds.
    Ok,
}

/// In-memory [`BackendAdapter`] implementation.
pub struct MemoryAdapter {
    backend_name: String,
    objects: Arc<RwLock<HashMap<ObjectId, Bytes>>>,
    faults: Arc<RwLock<VecDeque<InjectedFault>>>,
    latency: Option<Duration>,
}

impl MemoryAdapter {
    /// Creates an adapter that always succeeds.
    #[must_use]
    pub fn new(backend_name: impl Into<String>) -> Self {
        Self {
            backend_name: backend_name.into(),
            objects: Arc::new(RwLock::new(HashMap::new())),
            faults: Arc::new(RwLock::new(VecDeque::new())),
            latency: None,
        }
    }

    /// Creates an adapter that consumes the given fault sequence, one fault
    /// per call, then succeeds.
    #[must_use]
    pub fn with_faults(backend_name: impl Into<String>, faults: Vec<InjectedFault>) -> Self {
        let adapter = Self::new(backend_name);
        *adapter.faults.write() = faults.into();
        adapter
    }

    /// Adds simulated per-call latency.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Appends a fault to the injection queue.
    pub fn push_fault(&self, fault: InjectedFault) {
        self.faults.write().push_back(fault);
    }

    /// Number of stored objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns `true` when the object is present.
    #[must_use]
    pub fn contains(&self, object_id: &ObjectId) -> bool {
        self.objects.read().contains_key(object_id)
    }

    async fn before_call(&self) -> CoreResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let fault = self.faults.write().pop_front();
        match fault {
            Some(InjectedFault::Transient(msg)) => {
                Err(CoreError::adapter(self.backend_name.clone(), msg))
            }
            Some(InjectedFault::Timeout) => Err(CoreError::AdapterTimeout {
                backend: self.backend_name.clone(),
            }),
            Some(InjectedFault::Ok) | None => Ok(()),
        }
    }
}

#[async_trait]
impl BackendAdapter for MemoryAdapter {
    async fn put(&self, object_id: &ObjectId, data: Bytes) -> CoreResult<u64> {
        self.before_call().await?;
        let size = data.len() as u64;
        self.objects.write().insert(object_id.clone(), data);
        Ok(size)
    }

    async fn get(&self, object_id: &ObjectId) -> CoreResult<Bytes> {
        self.before_call().await?;
        self.objects
            .read()
            .get(object_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("object", object_id.as_str()))
    }

    async fn delete(&self, object_id: &ObjectId) -> CoreResult<()> {
        self.before_call().await?;
        self.objects.write().remove(object_id);
        Ok(())
    }

    async fn stat(&self, object_id: &ObjectId) -> CoreResult<Option<u64>> {
        self.before_call().await?;
        Ok(self
            .objects
            .read()
            .get(object_id)
            .map(|data| data.len() as u64))
    }
}
