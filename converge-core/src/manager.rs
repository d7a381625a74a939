//! Manager - Trait abstracting remote resource operations
//!
//! A ResourceManager performs create/retrieve/update/delete for one resource
//! kind against a remote system. Waiting for remote state to settle, paging and
//! encoding composite identifiers are the implementation's business; the engine
//! only sees the four calls below.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::BoxError;
use crate::resource::{ProviderId, Resource};

/// Failure reported by a [`ResourceManager`]
///
/// Managers never see internal ids, so the context they can attach is the
/// kind they manage and the provider identifier the call was about.
#[derive(Debug)]
pub struct ManagerError {
    pub message: String,
    /// Resource kind (e.g., "subnet")
    pub kind: Option<&'static str>,
    /// Provider identifier the failing call targeted
    pub provider_id: Option<String>,
    /// The remote object does not exist
    pub not_found: bool,
    pub cause: Option<BoxError>,
}

impl fmt::Display for ManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, &self.provider_id) {
            (Some(kind), Some(id)) => write!(f, "{} {}: {}", kind, id, self.message),
            (Some(kind), None) => write!(f, "{}: {}", kind, self.message),
            (None, Some(id)) => write!(f, "{}: {}", id, self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ManagerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl ManagerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            provider_id: None,
            not_found: false,
            cause: None,
        }
    }

    /// The object identified by `provider_id` does not exist remotely
    pub fn not_found(kind: &'static str, provider_id: impl Into<String>) -> Self {
        Self {
            not_found: true,
            ..Self::new("not found")
                .for_kind(kind)
                .with_provider_id(provider_id)
        }
    }

    pub fn for_kind(mut self, kind: &'static str) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

pub type ManagerResult<T> = Result<T, ManagerError>;

/// Persisted record type for the resources handled by manager `M`
pub type ResourceOf<M> = Resource<
    <M as ResourceManager>::Input,
    <M as ResourceManager>::Output,
    <M as ResourceManager>::ProviderId,
>;

/// Capability set every concrete resource kind implements
///
/// Calls are keyed by the provider-assigned identifier, never by the internal id.
#[async_trait]
pub trait ResourceManager: Send + Sync + 'static {
    /// Desired configuration payload
    type Input: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
    /// Remote representation returned by create/update/retrieve
    type Output: Serialize + DeserializeOwned + Send + Sync + 'static;
    /// Identifier assigned by the remote provider
    type ProviderId: ProviderId;

    /// Name of the resource kind (e.g., "subnet")
    fn kind(&self) -> &'static str;

    /// Create the remote resource
    ///
    /// Only called when no record exists for the internal id. The returned
    /// identifier must come from the real creation and must not be blank.
    async fn create(
        &self,
        input: &Self::Input,
    ) -> ManagerResult<(Self::ProviderId, Self::Output)>;

    /// Fetch the current remote representation
    async fn retrieve(&self, id: &Self::ProviderId) -> ManagerResult<Self::Output>;

    /// Update an existing remote resource
    ///
    /// A changed identifier in the result means the remote resource was replaced.
    async fn update(
        &self,
        id: &Self::ProviderId,
        input: &Self::Input,
    ) -> ManagerResult<(Self::ProviderId, Self::Output)>;

    /// Delete the remote resource
    ///
    /// Returns false if the resource was already absent.
    async fn delete(&self, id: &Self::ProviderId) -> ManagerResult<bool>;
}

struct RegisteredManager {
    kind: &'static str,
    manager: Arc<dyn Any + Send + Sync>,
}

/// Fully-constructed managers, keyed by their concrete type
#[derive(Default)]
pub struct ManagerRegistry {
    managers: HashMap<TypeId, RegisteredManager>,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manager, replacing any previous one of the same type
    pub fn register<M: ResourceManager>(&mut self, manager: Arc<M>) {
        let kind = manager.kind();
        self.managers.insert(
            TypeId::of::<M>(),
            RegisteredManager { kind, manager },
        );
    }

    pub fn with<M: ResourceManager>(mut self, manager: Arc<M>) -> Self {
        self.register(manager);
        self
    }

    /// Look up the manager of type `M`
    pub fn get<M: ResourceManager>(&self) -> Option<Arc<M>> {
        let registered = self.managers.get(&TypeId::of::<M>())?;
        Arc::clone(&registered.manager).downcast::<M>().ok()
    }

    /// Names of the registered resource kinds, sorted
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.managers.values().map(|m| m.kind).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

impl fmt::Debug for ManagerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
