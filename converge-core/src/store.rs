//! Store - Idempotency ledger of persisted resource records
//!
//! Between `load` and `save` every operation works on the in-memory map only.
//! Nothing reaches the backend until `save` is called.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;

use crate::backend::{BackendError, Snapshot, StateBackend};
use crate::resource::ResourceId;

/// Errors raised by a resource store
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists for the id
    #[error("No record for resource: {0}")]
    NotFound(ResourceId),

    /// A record appeared between the existence check and the write
    #[error("Record for {0} was written concurrently")]
    Conflict(ResourceId),

    /// A previous holder of the store lock panicked
    #[error("Store lock poisoned")]
    LockPoisoned,

    /// The durable backend failed
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Contract for persisting resource records
#[async_trait]
pub trait ResourceStorer: Send + Sync {
    /// Check whether a record exists
    fn exists(&self, id: &ResourceId) -> StoreResult<bool>;

    /// Get the serialized record
    fn get(&self, id: &ResourceId) -> StoreResult<Vec<u8>>;

    /// Insert or replace a record
    fn set(&self, id: &ResourceId, record: Vec<u8>) -> StoreResult<()>;

    /// Insert a record only if none exists, as one atomic step
    ///
    /// Returns false (and leaves the store untouched) if a record was present.
    fn set_if_absent(&self, id: &ResourceId, record: Vec<u8>) -> StoreResult<bool>;

    /// Remove a record; removing a missing record is not an error
    fn delete(&self, id: &ResourceId) -> StoreResult<()>;

    /// All ids currently recorded, sorted
    fn ids(&self) -> StoreResult<Vec<ResourceId>>;

    /// Replace the in-memory state with the durable snapshot
    async fn load(&self) -> StoreResult<()>;

    /// Flush the in-memory state to the durable backend
    async fn save(&self) -> StoreResult<()>;
}

/// Mutex-guarded in-memory store over a [`StateBackend`]
pub struct ResourceStore<B> {
    backend: B,
    data: Mutex<Snapshot>,
}

impl<B: StateBackend> ResourceStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            data: Mutex::new(Snapshot::new()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Snapshot>> {
        self.data.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

#[async_trait]
impl<B: StateBackend> ResourceStorer for ResourceStore<B> {
    fn exists(&self, id: &ResourceId) -> StoreResult<bool> {
        Ok(self.lock()?.contains_key(id))
    }

    fn get(&self, id: &ResourceId) -> StoreResult<Vec<u8>> {
        self.lock()?
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    fn set(&self, id: &ResourceId, record: Vec<u8>) -> StoreResult<()> {
        self.lock()?.insert(id.clone(), record);
        Ok(())
    }

    fn set_if_absent(&self, id: &ResourceId, record: Vec<u8>) -> StoreResult<bool> {
        let mut data = self.lock()?;
        if data.contains_key(id) {
            return Ok(false);
        }
        data.insert(id.clone(), record);
        Ok(true)
    }

    fn delete(&self, id: &ResourceId) -> StoreResult<()> {
        self.lock()?.remove(id);
        Ok(())
    }

    fn ids(&self) -> StoreResult<Vec<ResourceId>> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    async fn load(&self) -> StoreResult<()> {
        let snapshot = self.backend.read().await?;
        log::debug!("Loaded {} resource record(s)", snapshot.len());
        *self.lock()? = snapshot;
        Ok(())
    }

    async fn save(&self) -> StoreResult<()> {
        let snapshot = self.lock()?.clone();
        self.backend.write(&snapshot).await?;
        log::debug!("Saved {} resource record(s)", snapshot.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendResult, MemoryBackend};
    use std::sync::Arc;

    struct BrokenBackend;

    #[async_trait]
    impl StateBackend for BrokenBackend {
        async fn read(&self) -> BackendResult<Snapshot> {
            Err(BackendError::Io("disk unplugged".to_string()))
        }

        async fn write(&self, _snapshot: &Snapshot) -> BackendResult<()> {
            Err(BackendError::Io("disk unplugged".to_string()))
        }
    }

    #[test]
    fn set_get_delete() {
        let store = ResourceStore::new(MemoryBackend::new());
        let id = ResourceId::new("vpc");

        assert!(!store.exists(&id).unwrap());
        store.set(&id, b"one".to_vec()).unwrap();
        assert!(store.exists(&id).unwrap());
        assert_eq!(store.get(&id).unwrap(), b"one".to_vec());

        store.set(&id, b"two".to_vec()).unwrap();
        assert_eq!(store.get(&id).unwrap(), b"two".to_vec());

        store.delete(&id).unwrap();
        assert!(!store.exists(&id).unwrap());
        // deleting again is fine
        store.delete(&id).unwrap();
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = ResourceStore::new(MemoryBackend::new());
        let err = store.get(&ResourceId::new("nope")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id.as_str() == "nope"));
    }

    #[test]
    fn set_if_absent_only_writes_once() {
        let store = ResourceStore::new(MemoryBackend::new());
        let id = ResourceId::new("subnet");

        assert!(store.set_if_absent(&id, b"first".to_vec()).unwrap());
        assert!(!store.set_if_absent(&id, b"second".to_vec()).unwrap());
        assert_eq!(store.get(&id).unwrap(), b"first".to_vec());
    }

    #[test]
    fn concurrent_set_if_absent_has_single_winner() {
        let store = Arc::new(ResourceStore::new(MemoryBackend::new()));
        let id = ResourceId::new("shared");

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = Arc::clone(&store);
                let id = id.clone();
                std::thread::spawn(move || store.set_if_absent(&id, vec![n]).unwrap())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn nothing_reaches_backend_before_save() {
        let backend = MemoryBackend::new();
        let store = ResourceStore::new(backend.clone());

        store.set(&ResourceId::new("vpc"), b"{}".to_vec()).unwrap();
        assert!(backend.snapshot().unwrap().is_empty());

        store.save().await.unwrap();
        assert_eq!(backend.snapshot().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn load_replaces_memory_state() {
        let backend = MemoryBackend::new();
        let first = ResourceStore::new(backend.clone());
        first.set(&ResourceId::new("a"), vec![1]).unwrap();
        first.set(&ResourceId::new("b"), vec![2]).unwrap();
        first.save().await.unwrap();

        let second = ResourceStore::new(backend);
        second.set(&ResourceId::new("stale"), vec![0]).unwrap();
        second.load().await.unwrap();

        assert_eq!(
            second.ids().unwrap(),
            vec![ResourceId::new("a"), ResourceId::new("b")]
        );
    }

    #[tokio::test]
    async fn backend_failures_surface() {
        let store = ResourceStore::new(BrokenBackend);
        assert!(matches!(
            store.load().await,
            Err(StoreError::Backend(BackendError::Io(_)))
        ));
        assert!(matches!(
            store.save().await,
            Err(StoreError::Backend(BackendError::Io(_)))
        ));
    }
}
