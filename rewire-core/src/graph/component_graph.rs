//! Component Graph
//!
//! The graph owns the nodes of one container generation and drives their
//! construction.
//!
//! # Algorithm
//!
//! Completion constructs every node after all of its injected dependencies:
//!
//! 1. Check that every injected id names a node in this graph
//! 2. Run Kahn's algorithm over the injections; nodes it cannot order sit
//!    on or behind a cycle, and one cycle is reported
//! 3. Walk the nodes in declaration order, placing each node's
//!    dependencies (depth first) right before the node itself
//! 4. Construct nodes in that order, stopping at the first failure
//!
//! A node declared after a failing node is therefore never constructed,
//! unless the failing node or an earlier one depends on it.
//!
//! Nodes adopted from the previous generation through
//! [`reuse_nodes`](ComponentGraph::reuse_nodes) are already constructed and
//! are skipped, which is what keeps unchanged instances alive across
//! reconfigurations.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info};

use super::node::{ComponentId, ConstructionContext, Dependency, Instance, Node};
use crate::component::Component;
use crate::config::{ConfigKey, ConfigSet};
use crate::error::{ConstructionError, GraphError};
use crate::resolver::FallbackResolver;

/// The components of one generation, in declaration order.
#[derive(Debug)]
pub struct ComponentGraph {
    generation: u64,

    /// All nodes, keyed by id. Insertion order is declaration order.
    nodes: IndexMap<ComponentId, Node>,

    /// Configs available to constructors.
    configs: ConfigSet,
}

impl ComponentGraph {
    /// Create an empty graph for `generation`.
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            nodes: IndexMap::new(),
            configs: ConfigSet::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Add a node to the graph.
    pub fn add(&mut self, node: Node) -> Result<(), GraphError> {
        if self.nodes.contains_key(node.id()) {
            return Err(GraphError::DuplicateNode {
                id: node.id().clone(),
            });
        }
        self.nodes.insert(node.id().clone(), node);
        Ok(())
    }

    /// Declare that `dependency` is injected into the node `id`.
    ///
    /// The dependency does not have to exist yet; dangling injections are
    /// reported by [`complete`](Self::complete).
    pub fn inject(&mut self, id: &ComponentId, dependency: impl Into<ComponentId>) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownComponent { id: id.clone() })?;
        node.inject(dependency);
        Ok(())
    }

    pub fn node(&self, id: &ComponentId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Iterate over nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Replace the configs available to constructors.
    pub fn set_available_configs(&mut self, configs: ConfigSet) {
        self.configs = configs;
    }

    pub fn available_configs(&self) -> &ConfigSet {
        &self.configs
    }

    /// Keys of every config some node in this graph reads.
    pub fn config_keys(&self) -> BTreeSet<ConfigKey> {
        self.nodes.values().flat_map(Node::config_keys).collect()
    }

    /// The instance of node `id`, if it has been constructed.
    pub fn instance(&self, id: &ComponentId) -> Option<&Instance> {
        self.nodes.get(id).and_then(Node::instance)
    }

    /// The instance of node `id` as its concrete type.
    pub fn component<T: Component>(&self, id: &ComponentId) -> Option<Arc<T>> {
        self.instance(id).and_then(Instance::downcast::<T>)
    }

    /// Adopt the instances of nodes that are unchanged since `previous`.
    ///
    /// A node is unchanged when `previous` has a constructed node with the
    /// same declaration that consumed the same config payloads, injected
    /// the same ids, and whose dependencies are all unchanged as well.
    ///
    /// Returns the number of adopted nodes.
    pub fn reuse_nodes(&mut self, previous: &ComponentGraph) -> usize {
        let mut memo = HashMap::new();
        let mut visiting = HashSet::new();
        let reusable: Vec<ComponentId> = self
            .nodes
            .keys()
            .filter(|id| self.is_equivalent(id, previous, &mut memo, &mut visiting))
            .cloned()
            .collect();

        for id in &reusable {
            if let (Some(node), Some(old)) = (self.nodes.get_mut(id), previous.nodes.get(id)) {
                node.adopt(old);
            }
        }

        debug!(
            generation = self.generation,
            reused = reusable.len(),
            total = self.nodes.len(),
            "reused nodes from previous graph"
        );
        reusable.len()
    }

    fn is_equivalent(
        &self,
        id: &ComponentId,
        previous: &ComponentGraph,
        memo: &mut HashMap<ComponentId, bool>,
        visiting: &mut HashSet<ComponentId>,
    ) -> bool {
        if let Some(&known) = memo.get(id) {
            return known;
        }
        // A node on a cycle is never constructed, so never reusable.
        if !visiting.insert(id.clone()) {
            return false;
        }

        let equivalent = match (self.nodes.get(id), previous.nodes.get(id)) {
            (Some(node), Some(old)) => {
                old.is_constructed()
                    && node.same_declaration(old)
                    && node.injected() == old.injected()
                    && self.same_configs(node, previous)
                    && node
                        .injected()
                        .iter()
                        .all(|dependency| self.is_equivalent(dependency, previous, memo, visiting))
            }
            _ => false,
        };

        visiting.remove(id);
        memo.insert(id.clone(), equivalent);
        equivalent
    }

    fn same_configs(&self, node: &Node, previous: &ComponentGraph) -> bool {
        node.config_keys()
            .iter()
            .all(|key| self.configs.get(key) == previous.configs.get(key))
    }

    /// Construct every node that is not constructed yet.
    ///
    /// Fails on the first node that cannot be constructed; nodes ordered
    /// after it are left unconstructed.
    pub fn complete(&mut self, fallback: &dyn FallbackResolver) -> Result<(), GraphError> {
        self.check_dependencies()?;
        let order = self.construction_order()?;

        let mut constructed = 0usize;
        for index in order {
            if self.nodes[index].is_constructed() {
                continue;
            }
            let dependencies = self.dependencies_of(index)?;

            let ctx = ConstructionContext {
                dependencies,
                fallback,
                configs: &self.configs,
            };
            if let Some((id, node)) = self.nodes.get_index_mut(index) {
                node.construct_instance(&ctx)
                    .map_err(|source| GraphError::ComponentConstructor {
                        id: id.clone(),
                        source,
                    })?;
                constructed += 1;
            }
        }

        info!(
            generation = self.generation,
            constructed,
            reused = self.nodes.len() - constructed,
            "component graph complete"
        );
        Ok(())
    }

    fn check_dependencies(&self) -> Result<(), GraphError> {
        for node in self.nodes.values() {
            if let Some(dependency) = node
                .injected()
                .iter()
                .find(|dependency| !self.nodes.contains_key(*dependency))
            {
                return Err(GraphError::MissingDependency {
                    id: node.id().clone(),
                    dependency: dependency.clone(),
                });
            }
        }
        Ok(())
    }

    /// Order node indices so that every node comes after its dependencies
    /// and otherwise follows declaration order.
    fn construction_order(&self) -> Result<Vec<usize>, GraphError> {
        self.check_acyclic()?;

        let mut placed = vec![false; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        for index in 0..self.nodes.len() {
            self.place(index, &mut placed, &mut order);
        }
        Ok(order)
    }

    /// Push `index` after its not yet placed dependencies. The graph must be
    /// acyclic.
    fn place(&self, index: usize, placed: &mut [bool], order: &mut Vec<usize>) {
        if placed[index] {
            return;
        }
        placed[index] = true;
        for dependency in self.nodes[index].injected() {
            if let Some(dependency_index) = self.nodes.get_index_of(dependency) {
                self.place(dependency_index, placed, order);
            }
        }
        order.push(index);
    }

    /// Kahn's algorithm over the injections. Fails with one cycle if some
    /// nodes can never be ordered.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        let count = self.nodes.len();
        let mut waiting = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (index, node) in self.nodes.values().enumerate() {
            for dependency in node.injected() {
                if let Some(dependency_index) = self.nodes.get_index_of(dependency) {
                    waiting[index] += 1;
                    dependents[dependency_index].push(index);
                }
            }
        }

        let mut ready: Vec<usize> = (0..count).filter(|&index| waiting[index] == 0).collect();
        let mut ordered = 0usize;

        while let Some(index) = ready.pop() {
            ordered += 1;
            for &dependent in &dependents[index] {
                waiting[dependent] -= 1;
                if waiting[dependent] == 0 {
                    ready.push(dependent);
                }
            }
        }

        if ordered < count {
            let cycle = self.find_cycle(&waiting);
            if let Some(id) = cycle.first().cloned() {
                return Err(GraphError::ComponentConstructor {
                    id,
                    source: ConstructionError::DependencyCycle { cycle },
                });
            }
        }

        Ok(())
    }

    /// Find one cycle among the nodes Kahn's algorithm could not order.
    ///
    /// Every such node waits on at least one other unordered node, so
    /// following those edges from any of them must revisit a node.
    fn find_cycle(&self, waiting: &[usize]) -> Vec<ComponentId> {
        let Some(start) = waiting.iter().position(|&count| count > 0) else {
            return Vec::new();
        };

        let mut path: Vec<usize> = Vec::new();
        let mut on_path: HashMap<usize, usize> = HashMap::new();
        let mut current = start;

        loop {
            if let Some(&position) = on_path.get(&current) {
                return path[position..]
                    .iter()
                    .map(|&index| self.nodes[index].id().clone())
                    .collect();
            }
            on_path.insert(current, path.len());
            path.push(current);

            let next = self.nodes[current]
                .injected()
                .iter()
                .filter_map(|dependency| self.nodes.get_index_of(dependency))
                .find(|&index| waiting[index] > 0);
            match next {
                Some(next) => current = next,
                None => return Vec::new(),
            }
        }
    }

    fn dependencies_of(&self, index: usize) -> Result<Vec<Dependency>, GraphError> {
        let node = &self.nodes[index];
        node.injected()
            .iter()
            .map(|dependency_id| {
                let dependency = &self.nodes[dependency_id];
                let instance = dependency.instance().cloned().ok_or_else(|| {
                    GraphError::ComponentConstructor {
                        id: node.id().clone(),
                        source: ConstructionError::NotConstructed {
                            id: dependency_id.clone(),
                        },
                    }
                })?;
                Ok(Dependency {
                    id: dependency_id.clone(),
                    instance_type: dependency.instance_type(),
                    instance,
                })
            })
            .collect()
    }

    /// Every live instance of this graph: node instances, then auxiliaries.
    ///
    /// Instances shared by several nodes appear once.
    pub fn all_constructed_components_and_providers(&self) -> IndexSet<Instance> {
        let primaries = self.nodes.values().filter_map(Node::instance);
        let auxiliaries = self.nodes.values().flat_map(Node::auxiliaries);
        primaries.chain(auxiliaries).cloned().collect()
    }
}

impl Default for ComponentGraph {
    fn default() -> Self {
        Self::new(0)
    }
}
