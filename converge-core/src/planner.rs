//! Planner - Ordering of declared resources
//!
//! The planner keeps lazy resources in declaration order and derives a
//! creation order that respects every `depends_on` edge. Deletion runs the
//! creation order backwards.

use std::collections::{BTreeSet, HashMap, HashSet};

use thiserror::Error;

use crate::lazy::PlannedResource;
use crate::resource::ResourceId;

/// Errors raised while planning
#[derive(Debug, Error)]
pub enum PlanError {
    /// The dependency graph contains a cycle
    #[error("Dependency cycle among: {}", join_ids(.ids))]
    Cycle { ids: Vec<ResourceId> },

    /// A resource depends on an id that was never declared
    #[error("{id} depends on undeclared resource {target}")]
    UnknownDependency { id: ResourceId, target: ResourceId },

    /// The planner refused the resource
    #[error("{0}")]
    Rejected(String),
}

fn join_ids(ids: &[ResourceId]) -> String {
    ids.iter()
        .map(ResourceId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Registry of lazy resources that produces safe orderings
pub trait Planner: Send + Sync {
    /// Register a resource
    fn add_resource(&mut self, resource: Box<dyn PlannedResource>) -> Result<(), PlanError>;

    fn contains(&self, id: &ResourceId) -> bool;

    fn resource(&self, id: &ResourceId) -> Option<&(dyn PlannedResource + 'static)>;

    fn resource_mut(&mut self, id: &ResourceId) -> Option<&mut (dyn PlannedResource + 'static)>;

    /// Number of registered resources
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Order in which resources must be created
    ///
    /// Every resource comes after everything in its `depends_on`.
    fn topo_sort_for_creation(&self) -> Result<Vec<ResourceId>, PlanError>;

    /// Order in which resources must be deleted
    fn topo_sort_for_deletion(&self) -> Result<Vec<ResourceId>, PlanError> {
        let mut order = self.topo_sort_for_creation()?;
        order.reverse();
        Ok(order)
    }
}

/// Planner doing a topological sort over `depends_on`
///
/// Among resources without an ordering constraint, declaration order wins,
/// so the result is deterministic.
#[derive(Default)]
pub struct DependencyPlanner {
    resources: Vec<Box<dyn PlannedResource>>,
    index: HashMap<ResourceId, usize>,
}

impl DependencyPlanner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Planner for DependencyPlanner {
    fn add_resource(&mut self, resource: Box<dyn PlannedResource>) -> Result<(), PlanError> {
        let id = resource.id().clone();
        if self.index.contains_key(&id) {
            return Err(PlanError::Rejected(format!("{} is already planned", id)));
        }
        self.index.insert(id, self.resources.len());
        self.resources.push(resource);
        Ok(())
    }

    fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    fn resource(&self, id: &ResourceId) -> Option<&(dyn PlannedResource + 'static)> {
        let position = *self.index.get(id)?;
        self.resources.get(position).map(|r| &**r)
    }

    fn resource_mut(&mut self, id: &ResourceId) -> Option<&mut (dyn PlannedResource + 'static)> {
        let position = *self.index.get(id)?;
        self.resources.get_mut(position).map(|r| &mut **r)
    }

    fn len(&self) -> usize {
        self.resources.len()
    }

    fn topo_sort_for_creation(&self) -> Result<Vec<ResourceId>, PlanError> {
        let count = self.resources.len();
        // Number of unsatisfied dependencies per resource
        let mut pending = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (position, resource) in self.resources.iter().enumerate() {
            let mut seen = HashSet::new();
            for target in resource.depends_on() {
                let target_position =
                    *self
                        .index
                        .get(target)
                        .ok_or_else(|| PlanError::UnknownDependency {
                            id: resource.id().clone(),
                            target: target.clone(),
                        })?;
                if seen.insert(target_position) {
                    pending[position] += 1;
                    dependents[target_position].push(position);
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|&p| pending[p] == 0).collect();
        let mut order = Vec::with_capacity(count);

        while let Some(position) = ready.pop_first() {
            order.push(self.resources[position].id().clone());
            for &dependent in &dependents[position] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < count {
            let ids = (0..count)
                .filter(|&p| pending[p] > 0)
                .map(|p| self.resources[p].id().clone())
                .collect();
            return Err(PlanError::Cycle { ids });
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::error::EngineResult;
    use crate::lazy::{CreateOutcome, DeleteOutcome, Dependency};
    use crate::store::ResourceStorer;
    use async_trait::async_trait;

    struct Stub {
        id: ResourceId,
        depends_on: Vec<ResourceId>,
    }

    #[async_trait]
    impl PlannedResource for Stub {
        fn id(&self) -> &ResourceId {
            &self.id
        }

        fn kind(&self) -> &'static str {
            "stub"
        }

        fn depends_on(&self) -> &[ResourceId] {
            &self.depends_on
        }

        fn add_dependency(&mut self, dependency: Dependency) {
            self.depends_on.push(dependency.target().clone());
        }

        fn declared_input(&self) -> EngineResult<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        async fn create(
            &self,
            _store: &dyn ResourceStorer,
            _config: &EngineConfig,
        ) -> EngineResult<CreateOutcome> {
            Ok(CreateOutcome::Created)
        }

        async fn delete(&self, _store: &dyn ResourceStorer) -> EngineResult<DeleteOutcome> {
            Ok(DeleteOutcome::Deleted)
        }
    }

    fn stub(id: &str, depends_on: &[&str]) -> Box<dyn PlannedResource> {
        Box::new(Stub {
            id: ResourceId::new(id),
            depends_on: depends_on.iter().map(|d| ResourceId::new(*d)).collect(),
        })
    }

    fn ids(order: &[ResourceId]) -> Vec<&str> {
        order.iter().map(ResourceId::as_str).collect()
    }

    #[test]
    fn independent_resources_keep_declaration_order() {
        let mut planner = DependencyPlanner::new();
        planner.add_resource(stub("a", &[])).unwrap();
        planner.add_resource(stub("b", &[])).unwrap();
        planner.add_resource(stub("c", &[])).unwrap();

        let order = planner.topo_sort_for_creation().unwrap();
        assert_eq!(ids(&order), vec!["a", "b", "c"]);
        let order = planner.topo_sort_for_deletion().unwrap();
        assert_eq!(ids(&order), vec!["c", "b", "a"]);
    }

    #[test]
    fn dependents_declared_first_are_moved_after_dependencies() {
        let mut planner = DependencyPlanner::new();
        planner.add_resource(stub("asg", &["lt", "subnet"])).unwrap();
        planner.add_resource(stub("subnet", &["vpc"])).unwrap();
        planner.add_resource(stub("lt", &[])).unwrap();
        planner.add_resource(stub("vpc", &[])).unwrap();

        let order = planner.topo_sort_for_creation().unwrap();
        assert_eq!(ids(&order), vec!["lt", "vpc", "subnet", "asg"]);

        let position = |id: &str| order.iter().position(|o| o.as_str() == id).unwrap();
        assert!(position("vpc") < position("subnet"));
        assert!(position("subnet") < position("asg"));
        assert!(position("lt") < position("asg"));

        let deletion = planner.topo_sort_for_deletion().unwrap();
        assert_eq!(ids(&deletion), vec!["asg", "subnet", "vpc", "lt"]);
    }

    #[test]
    fn repeated_dependency_counts_once() {
        let mut planner = DependencyPlanner::new();
        planner.add_resource(stub("child", &["parent", "parent"])).unwrap();
        planner.add_resource(stub("parent", &[])).unwrap();

        let order = planner.topo_sort_for_creation().unwrap();
        assert_eq!(ids(&order), vec!["parent", "child"]);
    }

    #[test]
    fn two_node_cycle_is_reported() {
        let mut planner = DependencyPlanner::new();
        planner.add_resource(stub("a", &["b"])).unwrap();
        planner.add_resource(stub("b", &["a"])).unwrap();
        planner.add_resource(stub("c", &[])).unwrap();

        match planner.topo_sort_for_creation() {
            Err(PlanError::Cycle { ids: cycle }) => {
                assert_eq!(ids(&cycle), vec!["a", "b"]);
            }
            other => panic!("Expected Cycle, got {:?}", other),
        }
        assert!(planner.topo_sort_for_deletion().is_err());
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut planner = DependencyPlanner::new();
        planner.add_resource(stub("a", &["a"])).unwrap();
        assert!(matches!(
            planner.topo_sort_for_creation(),
            Err(PlanError::Cycle { .. })
        ));
    }

    #[test]
    fn unknown_dependency_is_reported() {
        let mut planner = DependencyPlanner::new();
        planner.add_resource(stub("subnet", &["vpc"])).unwrap();

        let err = planner.topo_sort_for_creation().unwrap_err();
        assert_eq!(err.to_string(), "subnet depends on undeclared resource vpc");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut planner = DependencyPlanner::new();
        planner.add_resource(stub("a", &[])).unwrap();
        assert!(matches!(
            planner.add_resource(stub("a", &[])),
            Err(PlanError::Rejected(_))
        ));
        assert_eq!(planner.len(), 1);
        assert!(planner.contains(&ResourceId::new("a")));
    }

    #[test]
    fn lookup_by_id() {
        let mut planner = DependencyPlanner::new();
        planner.add_resource(stub("a", &[])).unwrap();

        assert!(planner.contains(&ResourceId::new("a")));
        assert_eq!(planner.resource(&ResourceId::new("a")).unwrap().kind(), "stub");
        assert!(planner.resource_mut(&ResourceId::new("missing")).is_none());
    }

    #[test]
    fn cycle_message_lists_ids() {
        let err = PlanError::Cycle {
            ids: vec![ResourceId::new("a"), ResourceId::new("b")],
        };
        assert_eq!(err.to_string(), "Dependency cycle among: a, b");
    }
}
