//! Error - Failure taxonomy shared by every engine layer

use thiserror::Error;

use crate::manager::ManagerError;
use crate::planner::PlanError;
use crate::resource::ResourceId;
use crate::store::StoreError;

/// Boxed error returned by caller-supplied dependency closures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse tag for an [`EngineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Store,
    Manager,
    Authorization,
    Planning,
    Persistence,
    Rollback,
}

/// Errors raised by the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Resource planner is missing")]
    MissingPlanner,

    #[error("Resource store is missing")]
    MissingStore,

    #[error("No resource manager registered for {kind}")]
    MissingManager { kind: &'static str },

    #[error("Resource id is blank")]
    BlankResourceId,

    #[error("Resource {0} is already declared")]
    DuplicateResourceId(ResourceId),

    #[error("Resource {0} is not declared")]
    UnknownResource(ResourceId),

    #[error("Failed to check existence of {id} in store: {source}")]
    StoreExists {
        id: ResourceId,
        #[source]
        source: StoreError,
    },

    #[error("Failed to read {id} from store: {source}")]
    StoreGet {
        id: ResourceId,
        #[source]
        source: StoreError,
    },

    #[error("Failed to write {id} to store: {source}")]
    StoreSet {
        id: ResourceId,
        #[source]
        source: StoreError,
    },

    #[error("Failed to delete {id} from store: {source}")]
    StoreDelete {
        id: ResourceId,
        #[source]
        source: StoreError,
    },

    #[error("Failed to serialize {id}: {source}")]
    Serialize {
        id: ResourceId,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to deserialize {id}: {source}")]
    Deserialize {
        id: ResourceId,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to create {id}: {source}")]
    ManagerCreate {
        id: ResourceId,
        #[source]
        source: ManagerError,
    },

    #[error("Failed to retrieve {id}: {source}")]
    ManagerRetrieve {
        id: ResourceId,
        #[source]
        source: ManagerError,
    },

    #[error("Failed to update {id}: {source}")]
    ManagerUpdate {
        id: ResourceId,
        #[source]
        source: ManagerError,
    },

    #[error("Failed to destroy {id}: {source}")]
    ManagerDestroy {
        id: ResourceId,
        #[source]
        source: ManagerError,
    },

    #[error("Manager returned a blank provider id for {id}")]
    BlankProviderId { id: ResourceId },

    #[error("Creation of {id} not authorized: {source}")]
    CreateNotAuthorized {
        id: ResourceId,
        #[source]
        source: PlanError,
    },

    /// Reserved for deletion admission policies
    #[error("Deletion of {id} not authorized: {source}")]
    DeleteNotAuthorized {
        id: ResourceId,
        #[source]
        source: PlanError,
    },

    #[error("Failed to order resources: {0}")]
    Plan(#[from] PlanError),

    #[error("Failed to apply dependency {target} to {id}: {source}")]
    DependencyApply {
        id: ResourceId,
        target: ResourceId,
        #[source]
        source: BoxError,
    },

    #[error("Dependency {target} does not match the input type of {id}")]
    DependencyTypeMismatch { id: ResourceId, target: ResourceId },

    #[error("Failed to load state: {0}")]
    Load(#[source] StoreError),

    #[error("Failed to save state: {0}")]
    Save(#[source] StoreError),

    #[error("Rollback failed at {id} ({source}) after: {cause}")]
    RollbackFailed {
        id: ResourceId,
        #[source]
        source: Box<EngineError>,
        cause: Box<EngineError>,
    },
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingPlanner
            | Self::MissingStore
            | Self::MissingManager { .. }
            | Self::BlankResourceId
            | Self::DuplicateResourceId(_)
            | Self::UnknownResource(_)
            | Self::DependencyTypeMismatch { .. } => ErrorCategory::Configuration,
            Self::StoreExists { .. }
            | Self::StoreGet { .. }
            | Self::StoreSet { .. }
            | Self::StoreDelete { .. }
            | Self::Serialize { .. }
            | Self::Deserialize { .. } => ErrorCategory::Store,
            Self::ManagerCreate { .. }
            | Self::ManagerRetrieve { .. }
            | Self::ManagerUpdate { .. }
            | Self::ManagerDestroy { .. }
            | Self::BlankProviderId { .. }
            | Self::DependencyApply { .. } => ErrorCategory::Manager,
            Self::CreateNotAuthorized { .. } | Self::DeleteNotAuthorized { .. } => {
                ErrorCategory::Authorization
            }
            Self::Plan(_) => ErrorCategory::Planning,
            Self::Load(_) | Self::Save(_) => ErrorCategory::Persistence,
            Self::RollbackFailed { .. } => ErrorCategory::Rollback,
        }
    }

    /// Internal id of the resource the error is about, if any
    pub fn resource_id(&self) -> Option<&ResourceId> {
        match self {
            Self::DuplicateResourceId(id) | Self::UnknownResource(id) => Some(id),
            Self::StoreExists { id, .. }
            | Self::StoreGet { id, .. }
            | Self::StoreSet { id, .. }
            | Self::StoreDelete { id, .. }
            | Self::Serialize { id, .. }
            | Self::Deserialize { id, .. }
            | Self::ManagerCreate { id, .. }
            | Self::ManagerRetrieve { id, .. }
            | Self::ManagerUpdate { id, .. }
            | Self::ManagerDestroy { id, .. }
            | Self::BlankProviderId { id }
            | Self::CreateNotAuthorized { id, .. }
            | Self::DeleteNotAuthorized { id, .. }
            | Self::DependencyApply { id, .. }
            | Self::DependencyTypeMismatch { id, .. }
            | Self::RollbackFailed { id, .. } => Some(id),
            _ => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
