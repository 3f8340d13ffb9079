// The relationship graph (spec.md §3 "Relationship Graph", §4.1).
//
// Generalizes the teacher's `WorkflowDefinition` graph queries
// (`incoming_states`, `outgoing_states`, `find_unreachable_states` —
// `models::workflow`) from a flat Petri-net state graph to a directed
// graph over entities, edges typed by the connecting relationship.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::Result;
use crate::models::module::{Module, ModuleRegistry};
use crate::models::{LocalName, ModuleName, RelationshipSchema};

/// One directed edge: `from -[relationship]-> to`.
#[derive(Debug, Clone)]
pub struct Edge {
    pub relationship: LocalName,
    pub to: LocalName,
}

/// Directed graph over a module's entities, edges typed by the
/// connecting relationship (spec.md §3).
#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    edges: HashMap<LocalName, Vec<Edge>>,
    relationships: HashMap<LocalName, RelationshipSchema>,
}

impl RelationshipGraph {
    pub fn build(module: &Module) -> Self {
        let mut edges: HashMap<LocalName, Vec<Edge>> = HashMap::new();
        for rel in module.relationships.values() {
            edges.entry(rel.from.clone()).or_default().push(Edge {
                relationship: rel.name.clone(),
                to: rel.to.clone(),
            });
        }
        Self {
            edges,
            relationships: module
                .relationships
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn for_module(registry: &ModuleRegistry, name: &ModuleName) -> Result<Self> {
        let module = registry.module(name).ok_or_else(|| {
            crate::error::AgentlangError::NotFound(format!("module {name}"))
        })?;
        Ok(Self::build(&module))
    }

    pub fn outgoing(&self, entity: &LocalName) -> &[Edge] {
        self.edges.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Entities with an edge pointing at `entity` — the mirror of
    /// `outgoing`, the way the teacher's `incoming_states` mirrors
    /// `outgoing_states`.
    pub fn incoming(&self, entity: &LocalName) -> Vec<&LocalName> {
        self.edges
            .iter()
            .flat_map(|(from, edges)| {
                edges
                    .iter()
                    .filter(move |e| &e.to == entity)
                    .map(move |_| from)
            })
            .collect()
    }

    pub fn relationship(&self, name: &LocalName) -> Option<&RelationshipSchema> {
        self.relationships.get(name)
    }

    /// The relationship connecting `from` to `to`, if any.
    pub fn find_relationship(&self, from: &LocalName, to: &LocalName) -> Option<&RelationshipSchema> {
        self.edges
            .get(from)?
            .iter()
            .find(|e| &e.to == to)
            .and_then(|e| self.relationships.get(&e.relationship))
    }

    /// The entity names reachable from `root` purely via containment
    /// edges, in breadth-first order — this is the contains subtree a
    /// cascading delete/purge must walk (spec.md §4.4 item 5).
    pub fn contains_subtree(&self, root: &LocalName) -> Vec<LocalName> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut order = Vec::new();
        queue.push_back(root.clone());
        visited.insert(root.clone());
        while let Some(current) = queue.pop_front() {
            for edge in self.outgoing(&current) {
                let Some(rel) = self.relationships.get(&edge.relationship) else {
                    continue;
                };
                if rel.is_contains() && visited.insert(edge.to.clone()) {
                    order.push(edge.to.clone());
                    queue.push_back(edge.to.clone());
                }
            }
        }
        order
    }
}
