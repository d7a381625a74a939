//! Lazy resources - Declared but not yet materialized resources
//!
//! A [`LazyResource`] carries everything needed to create or delete one
//! resource later: its input, its manager and its dependencies. Dependencies
//! are plain records `{ target, operation }`; the operation reads the target's
//! persisted record from the store when it runs, so no lazy resource ever holds
//! a reference to another one.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::engine::EngineConfig;
use crate::error::{BoxError, EngineError, EngineResult};
use crate::manager::{ResourceManager, ResourceOf};
use crate::resource::{ProviderId, Resource, ResourceId};
use crate::store::{ResourceStorer, StoreError};

/// What a creation step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// No record existed; the manager created the resource
    Created,
    /// A record existed; the manager updated the resource
    Updated,
    /// A record existed with the same input; the manager was not called
    Unchanged,
}

/// What a deletion step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The manager deleted the remote resource
    Deleted,
    /// The record existed but the remote resource was already gone
    AlreadyAbsent,
    /// Nothing was recorded for the id
    NotRecorded,
}

type ApplyOperation =
    Box<dyn Fn(&mut (dyn Any + 'static), &dyn ResourceStorer) -> EngineResult<()> + Send + Sync>;

/// Edge from a resource to one it depends on
pub struct Dependency {
    target: ResourceId,
    operation: Option<ApplyOperation>,
}

impl Dependency {
    /// Ordering-only dependency; the dependent's input is left alone
    pub fn ordering(target: ResourceId) -> Self {
        Self {
            target,
            operation: None,
        }
    }

    /// Dependency that copies data from the target's record into the input
    ///
    /// `apply` runs right before the dependent is created or updated and sees
    /// the target's persisted record. The target must already be in the store.
    pub fn applying<M, D, F>(id: ResourceId, target: ResourceId, apply: F) -> Self
    where
        M: ResourceManager,
        D: ResourceManager,
        F: Fn(&mut M::Input, &ResourceOf<D>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let source = target.clone();
        let operation = move |input: &mut (dyn Any + 'static),
                              store: &dyn ResourceStorer|
              -> EngineResult<()> {
            let input = input.downcast_mut::<M::Input>().ok_or_else(|| {
                EngineError::DependencyTypeMismatch {
                    id: id.clone(),
                    target: source.clone(),
                }
            })?;
            let other: ResourceOf<D> = load_record(store, &source)?;
            apply(input, &other).map_err(|cause| EngineError::DependencyApply {
                id: id.clone(),
                target: source.clone(),
                source: cause,
            })
        };

        Self {
            target,
            operation: Some(Box::new(operation)),
        }
    }

    pub fn target(&self) -> &ResourceId {
        &self.target
    }

    fn apply(&self, input: &mut (dyn Any + 'static), store: &dyn ResourceStorer) -> EngineResult<()> {
        match &self.operation {
            Some(operation) => operation(input, store),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("target", &self.target)
            .field("applies", &self.operation.is_some())
            .finish()
    }
}

/// Type-erased lazy resource as held by a planner
#[async_trait]
pub trait PlannedResource: Send + Sync {
    fn id(&self) -> &ResourceId;

    /// Name of the resource kind, from its manager
    fn kind(&self) -> &'static str;

    /// Ids this resource must be created after
    fn depends_on(&self) -> &[ResourceId];

    fn add_dependency(&mut self, dependency: Dependency);

    /// Input as declared, before any dependency operation ran
    fn declared_input(&self) -> EngineResult<serde_json::Value>;

    /// Run dependency operations, then create or update and persist the record
    ///
    /// The operations work on a copy of the declared input, so every call
    /// starts from the same input.
    async fn create(
        &self,
        store: &dyn ResourceStorer,
        config: &EngineConfig,
    ) -> EngineResult<CreateOutcome>;

    /// Delete the remote resource if recorded and drop its record
    async fn delete(&self, store: &dyn ResourceStorer) -> EngineResult<DeleteOutcome>;
}

/// Typed handle to a declared resource
///
/// Handles only carry the id; the engine resolves them when needed.
pub struct ResourceHandle<M> {
    id: ResourceId,
    _manager: PhantomData<fn() -> M>,
}

impl<M> ResourceHandle<M> {
    pub(crate) fn new(id: ResourceId) -> Self {
        Self {
            id,
            _manager: PhantomData,
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }
}

impl<M> Clone for ResourceHandle<M> {
    fn clone(&self) -> Self {
        Self::new(self.id.clone())
    }
}

impl<M> fmt::Debug for ResourceHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceHandle").field(&self.id).finish()
    }
}

/// Declared resource managed by `M`
pub struct LazyResource<M: ResourceManager> {
    id: ResourceId,
    input: M::Input,
    depends_on: Vec<ResourceId>,
    dependencies: Vec<Dependency>,
    manager: Arc<M>,
}

impl<M: ResourceManager> LazyResource<M> {
    pub fn new(id: ResourceId, input: M::Input, manager: Arc<M>) -> Self {
        Self {
            id,
            input,
            depends_on: Vec::new(),
            dependencies: Vec::new(),
            manager,
        }
    }

    pub fn with_depends_on(mut self, depends_on: Vec<ResourceId>) -> Self {
        for target in depends_on {
            self.add_dependency(Dependency::ordering(target));
        }
        self
    }

    pub fn input(&self) -> &M::Input {
        &self.input
    }

    fn record(&self, input: M::Input, provider_id: M::ProviderId, output: M::Output) -> ResourceOf<M> {
        Resource::new(self.id.clone(), provider_id, input, output)
            .with_depends_on(self.depends_on.clone())
    }

    fn check_provider_id(&self, provider_id: &M::ProviderId) -> EngineResult<()> {
        if provider_id.is_blank() {
            return Err(EngineError::BlankProviderId {
                id: self.id.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<M: ResourceManager> PlannedResource for LazyResource<M> {
    fn id(&self) -> &ResourceId {
        &self.id
    }

    fn kind(&self) -> &'static str {
        self.manager.kind()
    }

    fn depends_on(&self) -> &[ResourceId] {
        &self.depends_on
    }

    fn add_dependency(&mut self, dependency: Dependency) {
        if !self.depends_on.contains(dependency.target()) {
            self.depends_on.push(dependency.target().clone());
        }
        self.dependencies.push(dependency);
    }

    fn declared_input(&self) -> EngineResult<serde_json::Value> {
        serde_json::to_value(&self.input).map_err(|source| EngineError::Serialize {
            id: self.id.clone(),
            source,
        })
    }

    async fn create(
        &self,
        store: &dyn ResourceStorer,
        config: &EngineConfig,
    ) -> EngineResult<CreateOutcome> {
        let mut input = self.input.clone();
        for dependency in &self.dependencies {
            log::debug!("Applying dependency {} to {}", dependency.target(), self.id);
            dependency.apply(&mut input, store)?;
        }

        let exists = store
            .exists(&self.id)
            .map_err(|source| EngineError::StoreExists {
                id: self.id.clone(),
                source,
            })?;

        if !exists {
            let (provider_id, output) =
                self.manager
                    .create(&input)
                    .await
                    .map_err(|source| EngineError::ManagerCreate {
                        id: self.id.clone(),
                        source,
                    })?;
            self.check_provider_id(&provider_id)?;

            let bytes = encode_record(&self.record(input, provider_id, output))?;
            let inserted = store
                .set_if_absent(&self.id, bytes)
                .map_err(|source| EngineError::StoreSet {
                    id: self.id.clone(),
                    source,
                })?;
            if !inserted {
                return Err(EngineError::StoreSet {
                    id: self.id.clone(),
                    source: StoreError::Conflict(self.id.clone()),
                });
            }

            log::info!("Created {} ({})", self.id, self.manager.kind());
            return Ok(CreateOutcome::Created);
        }

        let prior: ResourceOf<M> = load_record(store, &self.id)?;
        if config.skip_unchanged && same_value(&prior.input, &input) {
            log::info!("Unchanged {} ({})", self.id, self.manager.kind());
            return Ok(CreateOutcome::Unchanged);
        }

        let (provider_id, output) = self
            .manager
            .update(&prior.provider_id, &input)
            .await
            .map_err(|source| EngineError::ManagerUpdate {
                id: self.id.clone(),
                source,
            })?;
        self.check_provider_id(&provider_id)?;
        if !same_value(&prior.provider_id, &provider_id) {
            log::warn!(
                "{} was replaced by the provider: {:?} -> {:?}",
                self.id,
                prior.provider_id,
                provider_id
            );
        }

        let bytes = encode_record(&self.record(input, provider_id, output))?;
        store
            .set(&self.id, bytes)
            .map_err(|source| EngineError::StoreSet {
                id: self.id.clone(),
                source,
            })?;

        log::info!("Updated {} ({})", self.id, self.manager.kind());
        Ok(CreateOutcome::Updated)
    }

    async fn delete(&self, store: &dyn ResourceStorer) -> EngineResult<DeleteOutcome> {
        let exists = store
            .exists(&self.id)
            .map_err(|source| EngineError::StoreExists {
                id: self.id.clone(),
                source,
            })?;
        if !exists {
            log::debug!("Nothing recorded for {}", self.id);
            return Ok(DeleteOutcome::NotRecorded);
        }

        let record: ResourceOf<M> = load_record(store, &self.id)?;
        let deleted = self
            .manager
            .delete(&record.provider_id)
            .await
            .map_err(|source| EngineError::ManagerDestroy {
                id: self.id.clone(),
                source,
            })?;

        store
            .delete(&self.id)
            .map_err(|source| EngineError::StoreDelete {
                id: self.id.clone(),
                source,
            })?;

        if deleted {
            log::info!("Deleted {} ({})", self.id, self.manager.kind());
            Ok(DeleteOutcome::Deleted)
        } else {
            log::info!("{} was already gone remotely", self.id);
            Ok(DeleteOutcome::AlreadyAbsent)
        }
    }
}

/// Read and decode the persisted record for `id`
pub(crate) fn load_record<I, O, P>(
    store: &dyn ResourceStorer,
    id: &ResourceId,
) -> EngineResult<Resource<I, O, P>>
where
    I: Serialize + DeserializeOwned,
    O: Serialize + DeserializeOwned,
    P: Serialize + DeserializeOwned,
{
    let bytes = store.get(id).map_err(|source| EngineError::StoreGet {
        id: id.clone(),
        source,
    })?;
    Resource::from_json(&bytes).map_err(|source| EngineError::Deserialize {
        id: id.clone(),
        source,
    })
}

fn encode_record<I, O, P>(record: &Resource<I, O, P>) -> EngineResult<Vec<u8>>
where
    I: Serialize + DeserializeOwned,
    O: Serialize + DeserializeOwned,
    P: Serialize + DeserializeOwned,
{
    record.to_json().map_err(|source| EngineError::Serialize {
        id: record.id.clone(),
        source,
    })
}

/// Structural equality through the serialized form
fn same_value<T: Serialize>(left: &T, right: &T) -> bool {
    match (serde_json::to_value(left), serde_json::to_value(right)) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}
