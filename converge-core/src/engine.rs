//! Engine - Apply and destroy orchestration
//!
//! The engine owns the planner and the store for its whole lifetime. Callers
//! declare resources through it, wire dependencies between the returned
//! handles, then run [`Engine::apply`] or [`Engine::destroy`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{BoxError, EngineError, EngineResult};
use crate::lazy::{
    CreateOutcome, DeleteOutcome, Dependency, LazyResource, ResourceHandle, load_record,
};
use crate::manager::{ManagerRegistry, ResourceManager, ResourceOf};
use crate::planner::Planner;
use crate::resource::ResourceId;
use crate::store::ResourceStorer;

/// What to do when a deletion fails during destroy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestroyMode {
    /// Stop at the first failure
    #[default]
    Halt,
    /// Attempt every deletion and report the first failure
    Continue,
}

/// Engine behavior switches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Destroy everything created by a failed apply, newest first
    pub rollback: bool,
    /// Skip the manager update when the stored input already matches
    pub skip_unchanged: bool,
    pub destroy_mode: DestroyMode,
}

/// Builder for [`Engine`]
#[derive(Default)]
pub struct EngineBuilder {
    planner: Option<Box<dyn Planner>>,
    store: Option<Box<dyn ResourceStorer>>,
    managers: ManagerRegistry,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn planner(mut self, planner: impl Planner + 'static) -> Self {
        self.planner = Some(Box::new(planner));
        self
    }

    pub fn store(mut self, store: impl ResourceStorer + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn managers(mut self, managers: ManagerRegistry) -> Self {
        self.managers = managers;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the parts and load the durable state
    pub async fn build(self) -> EngineResult<Engine> {
        let planner = self.planner.ok_or(EngineError::MissingPlanner)?;
        let store = self.store.ok_or(EngineError::MissingStore)?;

        store.load().await.map_err(EngineError::Load)?;
        log::debug!(
            "Engine ready with {} recorded resource(s) and managers {:?}",
            store.ids().map(|ids| ids.len()).unwrap_or_default(),
            self.managers.kinds()
        );

        Ok(Engine {
            config: self.config,
            planner,
            store,
            managers: self.managers,
        })
    }
}

/// Per-resource results of an apply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub outcomes: Vec<(ResourceId, CreateOutcome)>,
}

impl ApplyReport {
    pub fn outcome(&self, id: &ResourceId) -> Option<CreateOutcome> {
        self.outcomes
            .iter()
            .find(|(other, _)| other == id)
            .map(|(_, outcome)| *outcome)
    }

    pub fn count(&self, outcome: CreateOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }
}

impl fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Apply complete: {} created, {} updated, {} unchanged",
            self.count(CreateOutcome::Created),
            self.count(CreateOutcome::Updated),
            self.count(CreateOutcome::Unchanged)
        )
    }
}

/// Per-resource results of a destroy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestroyReport {
    pub outcomes: Vec<(ResourceId, DeleteOutcome)>,
}

impl DestroyReport {
    pub fn outcome(&self, id: &ResourceId) -> Option<DeleteOutcome> {
        self.outcomes
            .iter()
            .find(|(other, _)| other == id)
            .map(|(_, outcome)| *outcome)
    }

    pub fn count(&self, outcome: DeleteOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }
}

impl fmt::Display for DestroyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Destroy complete: {} deleted, {} already absent, {} not recorded",
            self.count(DeleteOutcome::Deleted),
            self.count(DeleteOutcome::AlreadyAbsent),
            self.count(DeleteOutcome::NotRecorded)
        )
    }
}

/// Resource lifecycle engine
pub struct Engine {
    config: EngineConfig,
    planner: Box<dyn Planner>,
    store: Box<dyn ResourceStorer>,
    managers: ManagerRegistry,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn ResourceStorer {
        &*self.store
    }

    /// Register a manager after construction
    pub fn register_manager<M: ResourceManager>(&mut self, manager: Arc<M>) {
        self.managers.register(manager);
    }

    /// Kind of a declared resource
    pub fn kind(&self, id: &ResourceId) -> Option<&'static str> {
        self.planner.resource(id).map(|r| r.kind())
    }

    /// Input of a declared resource as given at declaration, in JSON form
    pub fn declared_input(&self, id: &ResourceId) -> EngineResult<serde_json::Value> {
        self.planner
            .resource(id)
            .ok_or_else(|| EngineError::UnknownResource(id.clone()))?
            .declared_input()
    }

    /// Declare a resource managed by `M`
    ///
    /// Nothing is registered when validation fails.
    pub fn create_resource<M: ResourceManager>(
        &mut self,
        id: impl Into<ResourceId>,
        input: M::Input,
    ) -> EngineResult<ResourceHandle<M>> {
        self.create_resource_with_deps(id, input, Vec::new())
    }

    /// Declare a resource that must be created after `depends_on`
    pub fn create_resource_with_deps<M: ResourceManager>(
        &mut self,
        id: impl Into<ResourceId>,
        input: M::Input,
        depends_on: Vec<ResourceId>,
    ) -> EngineResult<ResourceHandle<M>> {
        let id = id.into();
        if id.is_blank() {
            return Err(EngineError::BlankResourceId);
        }
        if self.planner.contains(&id) {
            return Err(EngineError::DuplicateResourceId(id));
        }
        let manager = self
            .managers
            .get::<M>()
            .ok_or(EngineError::MissingManager {
                kind: std::any::type_name::<M>(),
            })?;

        let resource = LazyResource::new(id.clone(), input, manager).with_depends_on(depends_on);
        self.planner
            .add_resource(Box::new(resource))
            .map_err(|source| EngineError::CreateNotAuthorized {
                id: id.clone(),
                source,
            })?;

        log::debug!("Declared {}", id);
        Ok(ResourceHandle::new(id))
    }

    /// Make `dependent` wait for `dependency` and copy data from its record
    ///
    /// `apply` runs right before `dependent` is created or updated, with the
    /// dependency's persisted record.
    pub fn add_dependency<M, D, F>(
        &mut self,
        dependent: &ResourceHandle<M>,
        dependency: &ResourceHandle<D>,
        apply: F,
    ) -> EngineResult<()>
    where
        M: ResourceManager,
        D: ResourceManager,
        F: Fn(&mut M::Input, &ResourceOf<D>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let edge = Dependency::applying::<M, D, F>(
            dependent.id().clone(),
            dependency.id().clone(),
            apply,
        );
        self.attach(dependent.id(), edge)
    }

    /// Make `dependent` wait for `dependency` without touching its input
    pub fn add_ordering_dependency<M, D>(
        &mut self,
        dependent: &ResourceHandle<M>,
        dependency: &ResourceHandle<D>,
    ) -> EngineResult<()> {
        self.attach(dependent.id(), Dependency::ordering(dependency.id().clone()))
    }

    fn attach(&mut self, id: &ResourceId, dependency: Dependency) -> EngineResult<()> {
        if !self.planner.contains(dependency.target()) {
            return Err(EngineError::UnknownResource(dependency.target().clone()));
        }
        let resource = self
            .planner
            .resource_mut(id)
            .ok_or_else(|| EngineError::UnknownResource(id.clone()))?;
        log::debug!("{} depends on {}", id, dependency.target());
        resource.add_dependency(dependency);
        Ok(())
    }

    /// Creation order, without side effects
    pub fn plan(&self) -> EngineResult<Vec<ResourceId>> {
        Ok(self.planner.topo_sort_for_creation()?)
    }

    /// Create or update every declared resource in dependency order
    ///
    /// Stops at the first failure. With rollback enabled, everything created
    /// by this call is destroyed again, newest first. State is saved either way.
    pub async fn apply(&mut self) -> EngineResult<ApplyReport> {
        let order = self.planner.topo_sort_for_creation()?;
        log::info!("Applying {} resource(s)", order.len());

        let mut report = ApplyReport::default();
        let mut created = Vec::new();
        let mut failure = None;

        for id in &order {
            let resource = self
                .planner
                .resource(id)
                .ok_or_else(|| EngineError::UnknownResource(id.clone()))?;
            match resource.create(&*self.store, &self.config).await {
                Ok(outcome) => {
                    if outcome == CreateOutcome::Created {
                        created.push(id.clone());
                    }
                    report.outcomes.push((id.clone(), outcome));
                }
                Err(error) => {
                    log::error!("Apply stopped at {}: {}", id, error);
                    failure = Some(error);
                    break;
                }
            }
        }

        if let Some(error) = failure {
            let error = if self.config.rollback {
                self.rollback(&created, error).await
            } else {
                error
            };
            self.save_after_failure().await;
            return Err(error);
        }

        self.save().await?;
        log::info!("{}", report);
        Ok(report)
    }

    /// Delete everything created by a failed apply, newest first
    ///
    /// Returns the error to report: the original one, or a rollback failure
    /// that also carries it.
    async fn rollback(&self, created: &[ResourceId], cause: EngineError) -> EngineError {
        log::warn!("Rolling back {} created resource(s)", created.len());
        for id in created.iter().rev() {
            let Some(resource) = self.planner.resource(id) else {
                continue;
            };
            match resource.delete(&*self.store).await {
                Ok(_) => log::info!("Rolled back {}", id),
                Err(error) => {
                    log::error!("Rollback aborted at {}: {}", id, error);
                    return EngineError::RollbackFailed {
                        id: id.clone(),
                        source: Box::new(error),
                        cause: Box::new(cause),
                    };
                }
            }
        }
        cause
    }

    /// Delete every declared resource in reverse dependency order
    pub async fn destroy(&mut self) -> EngineResult<DestroyReport> {
        let order = self.planner.topo_sort_for_deletion()?;
        log::info!("Destroying {} resource(s)", order.len());

        let mut report = DestroyReport::default();
        let mut failure = None;

        for id in &order {
            let resource = self
                .planner
                .resource(id)
                .ok_or_else(|| EngineError::UnknownResource(id.clone()))?;
            match resource.delete(&*self.store).await {
                Ok(outcome) => report.outcomes.push((id.clone(), outcome)),
                Err(error) => {
                    log::error!("Failed to destroy {}: {}", id, error);
                    if failure.is_none() {
                        failure = Some(error);
                    }
                    if self.config.destroy_mode == DestroyMode::Halt {
                        break;
                    }
                }
            }
        }

        if let Some(error) = failure {
            self.save_after_failure().await;
            return Err(error);
        }

        self.save().await?;
        log::info!("{}", report);
        Ok(report)
    }

    /// Persisted record of a declared resource
    pub fn resource<M: ResourceManager>(
        &self,
        handle: &ResourceHandle<M>,
    ) -> EngineResult<ResourceOf<M>> {
        if !self.planner.contains(handle.id()) {
            return Err(EngineError::UnknownResource(handle.id().clone()));
        }
        load_record(&*self.store, handle.id())
    }

    /// Fetch the current remote representation of a created resource
    pub async fn retrieve<M: ResourceManager>(
        &self,
        handle: &ResourceHandle<M>,
    ) -> EngineResult<M::Output> {
        let manager = self
            .managers
            .get::<M>()
            .ok_or(EngineError::MissingManager {
                kind: std::any::type_name::<M>(),
            })?;
        let record = self.resource(handle)?;
        manager
            .retrieve(&record.provider_id)
            .await
            .map_err(|source| EngineError::ManagerRetrieve {
                id: handle.id().clone(),
                source,
            })
    }

    /// Flush the store to its durable backend
    pub async fn save(&self) -> EngineResult<()> {
        self.store.save().await.map_err(EngineError::Save)
    }

    async fn save_after_failure(&self) {
        if let Err(error) = self.store.save().await {
            log::error!("Failed to save state after failure: {}", error);
        }
    }
}
