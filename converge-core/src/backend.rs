//! State backend trait and error types
//!
//! A backend durably keeps the whole `{id -> record}` snapshot between runs.
//! The store reads it once at startup and writes it back on save.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

use crate::resource::ResourceId;

/// Everything the store knows: internal id to serialized record
pub type Snapshot = BTreeMap<ResourceId, Vec<u8>>;

/// Errors that can occur when interacting with a state backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend type is not supported
    #[error("Unsupported backend type: {0}")]
    UnsupportedBackend(String),

    /// Configuration error
    #[error("Backend configuration error: {0}")]
    Configuration(String),

    /// State file is corrupted or invalid
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Network or I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BackendError {
    /// Create an unsupported backend error
    pub fn unsupported_backend(backend_type: impl Into<String>) -> Self {
        Self::UnsupportedBackend(backend_type.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Trait for state storage backends
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Read the full snapshot
    ///
    /// Returns an empty snapshot on first use.
    async fn read(&self) -> BackendResult<Snapshot>;

    /// Replace the durable snapshot
    async fn write(&self, snapshot: &Snapshot) -> BackendResult<()>;
}

#[async_trait]
impl StateBackend for Box<dyn StateBackend> {
    async fn read(&self) -> BackendResult<Snapshot> {
        (**self).read().await
    }

    async fn write(&self, snapshot: &Snapshot) -> BackendResult<()> {
        (**self).write(snapshot).await
    }
}

/// In-process backend
///
/// Clones share the same snapshot, so a second store built on a clone sees
/// what the first one saved.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    snapshot: Arc<Mutex<Snapshot>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the last written snapshot
    pub fn snapshot(&self) -> BackendResult<Snapshot> {
        self.snapshot
            .lock()
            .map(|s| s.clone())
            .map_err(|_| BackendError::Io("memory backend lock poisoned".to_string()))
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn read(&self) -> BackendResult<Snapshot> {
        self.snapshot()
    }

    async fn write(&self, snapshot: &Snapshot) -> BackendResult<()> {
        let mut guard = self
            .snapshot
            .lock()
            .map_err(|_| BackendError::Io("memory backend lock poisoned".to_string()))?;
        *guard = snapshot.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_starts_empty() {
        let backend = MemoryBackend::new();
        assert!(backend.read().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_backend_clones_share_snapshot() {
        let backend = MemoryBackend::new();
        let other = backend.clone();

        let mut snapshot = Snapshot::new();
        snapshot.insert(ResourceId::new("vpc"), b"{}".to_vec());
        backend.write(&snapshot).await.unwrap();

        let read = other.read().await.unwrap();
        assert_eq!(read.get(&ResourceId::new("vpc")), Some(&b"{}".to_vec()));
    }

    #[tokio::test]
    async fn boxed_backend_delegates() {
        let inner = MemoryBackend::new();
        let boxed: Box<dyn StateBackend> = Box::new(inner.clone());

        let mut snapshot = Snapshot::new();
        snapshot.insert(ResourceId::new("a"), vec![1]);
        boxed.write(&snapshot).await.unwrap();

        assert_eq!(inner.snapshot().unwrap().len(), 1);
    }

    #[test]
    fn backend_error_display() {
        let error = BackendError::unsupported_backend("azure");
        assert_eq!(error.to_string(), "Unsupported backend type: azure");

        let error = BackendError::configuration("missing path");
        assert_eq!(error.to_string(), "Backend configuration error: missing path");
    }
}
