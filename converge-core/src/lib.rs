//! Converge Core
//!
//! Resource lifecycle engine: declare resources and the dependencies between
//! them, then create, update or destroy them in a safe order while keeping an
//! idempotency ledger of everything that was created.

pub mod backend;
pub mod cloud;
pub mod engine;
pub mod error;
pub mod lazy;
pub mod manager;
pub mod planner;
pub mod resource;
pub mod store;

pub use backend::{BackendError, BackendResult, MemoryBackend, Snapshot, StateBackend};
pub use engine::{ApplyReport, DestroyMode, DestroyReport, Engine, EngineBuilder, EngineConfig};
pub use error::{BoxError, EngineError, EngineResult, ErrorCategory};
pub use lazy::{CreateOutcome, DeleteOutcome, ResourceHandle};
pub use manager::{ManagerError, ManagerRegistry, ManagerResult, ResourceManager, ResourceOf};
pub use planner::{DependencyPlanner, PlanError, Planner};
pub use resource::{ProviderId, Resource, ResourceId};
pub use store::{ResourceStore, ResourceStorer, StoreError, StoreResult};
