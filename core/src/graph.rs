//! Entity dependency graph and phase scheduling.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::GraphError;
use crate::model::EntityKind;

/// Directed acyclic graph of entity kinds; an edge `a -> b` means `b` references `a`.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    dependencies: BTreeMap<EntityKind, BTreeSet<EntityKind>>,
}

impl DependencyGraph {
    pub fn new() -> Self { Self { dependencies: BTreeMap::new() } }

    /// The graph of every entity the generator knows, as declared by [`EntityKind::dependencies`].
    pub fn standard() -> Self {
        let mut graph = Self::new();
        for kind in EntityKind::ALL {
            graph.add(kind, kind.dependencies().iter().copied());
        }
        graph
    }

    pub fn add(&mut self, entity: EntityKind, dependencies: impl IntoIterator<Item = EntityKind>) -> &mut Self {
        self.dependencies.entry(entity).or_default().extend(dependencies);
        self
    }

    pub fn contains(&self, entity: EntityKind) -> bool { self.dependencies.contains_key(&entity) }

    pub fn dependencies_of(&self, entity: EntityKind) -> impl Iterator<Item = EntityKind> + '_ {
        self.dependencies.get(&entity).into_iter().flatten().copied()
    }

    /// Entities that reference `entity`.
    pub fn dependents_of(&self, entity: EntityKind) -> Vec<EntityKind> {
        self.dependencies.iter().filter(|(_, deps)| deps.contains(&entity)).map(|(kind, _)| *kind).collect()
    }

    /// Kahn's algorithm. Ties are broken by [`EntityKind`] ordering so the schedule is stable.
    pub fn topological_order(&self) -> Result<Vec<EntityKind>, GraphError> {
        let mut remaining: BTreeMap<EntityKind, usize> = BTreeMap::new();
        for (entity, deps) in &self.dependencies {
            for dependency in deps {
                if !self.dependencies.contains_key(dependency) {
                    return Err(GraphError::UnknownDependency { entity: *entity, dependency: *dependency });
                }
            }
            remaining.insert(*entity, deps.len());
        }

        let mut ready: BTreeSet<EntityKind> = remaining.iter().filter(|(_, count)| **count == 0).map(|(kind, _)| *kind).collect();
        let mut order = Vec::with_capacity(remaining.len());

        while let Some(next) = ready.pop_first() {
            remaining.remove(&next);
            order.push(next);
            for dependent in self.dependents_of(next) {
                if let Some(count) = remaining.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if !remaining.is_empty() {
            return Err(GraphError::Cycle(remaining.into_keys().collect()));
        }
        Ok(order)
    }
}

impl Default for DependencyGraph {
    fn default() -> Self { Self::standard() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_order_respects_every_edge() {
        let graph = DependencyGraph::standard();
        let order = graph.topological_order().unwrap();
        assert_eq!(order.len(), EntityKind::ALL.len());

        let position = |kind: EntityKind| order.iter().position(|k| *k == kind).unwrap();
        for kind in EntityKind::ALL {
            for dependency in kind.dependencies() {
                assert!(position(*dependency) < position(kind), "{dependency} must precede {kind}");
            }
        }
    }

    #[test]
    fn standard_order_is_stable() {
        let first = DependencyGraph::standard().topological_order().unwrap();
        let second = DependencyGraph::standard().topological_order().unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0], EntityKind::User);
        assert_eq!(*first.last().unwrap(), EntityKind::UserOfferer);
    }

    #[test]
    fn cycles_are_rejected() {
        let mut graph = DependencyGraph::new();
        graph.add(EntityKind::User, []).add(EntityKind::Offer, [EntityKind::Stock]).add(EntityKind::Stock, [EntityKind::Offer]);
        assert_eq!(graph.topological_order(), Err(GraphError::Cycle(vec![EntityKind::Offer, EntityKind::Stock])));
    }

    #[test]
    fn unknown_dependencies_are_rejected() {
        let mut graph = DependencyGraph::new();
        graph.add(EntityKind::Deposit, [EntityKind::User]);
        assert_eq!(
            graph.topological_order(),
            Err(GraphError::UnknownDependency { entity: EntityKind::Deposit, dependency: EntityKind::User })
        );
    }

    #[test]
    fn leaves_have_no_dependents() {
        let graph = DependencyGraph::standard();
        assert!(graph.dependents_of(EntityKind::Booking).is_empty());
        assert!(graph.dependents_of(EntityKind::UserOfferer).is_empty());
        assert_eq!(graph.dependents_of(EntityKind::Offer), vec![EntityKind::Stock]);
    }
}
