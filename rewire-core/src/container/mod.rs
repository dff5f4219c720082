//! Container Reconciliation
//!
//! The [`Reconciler`] turns config deliveries into component graphs. Each
//! call to [`Reconciler::new_component_graph`] runs one reconfiguration:
//!
//! 1. Pull snapshots until a components snapshot arrives. Every bootstrap
//!    snapshot on the way installs its module set and rebuilds the working
//!    topology, whose config keys are asked for by the next pull
//! 2. Build the graph for the components generation from the delivered
//!    topology and configs
//! 3. Adopt every unchanged instance of the current graph, then construct
//!    the rest
//! 4. Put the new graph in service, then deconstruct the instances of the
//!    current graph that did not make it into the new one and unload the
//!    modules that dropped out of the set
//!
//! The current graph is only read. If any step fails it stays in service
//! and the generations the failed attempt saw are skipped from then on.
//! Instances the failed attempt managed to construct are deconstructed.

mod generation;
mod supervisor;

pub use generation::GenerationTracker;
pub use supervisor::{Supervisor, SupervisorError};

use std::sync::Arc;

use indexmap::IndexSet;
use tracing::{debug, info, info_span, warn};

use crate::config::{get_config, ComponentsConfig, ConfigSet, ContainerSettings, ModulesConfig};
use crate::deconstruct::Deconstructor;
use crate::error::{ReconfigError, SnapshotError};
use crate::graph::{ComponentGraph, Instance, Node};
use crate::module::{ModuleLoader, ModuleRef};
use crate::resolver::FallbackResolver;
use crate::snapshot::{Snapshot, SnapshotSource};

/// Outcome of a reconfiguration that did not fail.
///
/// `G` is what the new graph was turned into when it was put in service;
/// [`Reconciler::new_component_graph`] hands back the graph itself.
#[derive(Debug)]
pub enum GraphUpdate<G = ComponentGraph> {
    /// The new graph is in service and the retired instances are gone.
    Applied(G),

    /// The snapshot pull was cancelled; the current graph stays in service.
    Cancelled,
}

impl<G> GraphUpdate<G> {
    pub fn into_graph(self) -> Option<G> {
        match self {
            GraphUpdate::Applied(graph) => Some(graph),
            GraphUpdate::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, GraphUpdate::Cancelled)
    }
}

/// A graph built from one components snapshot, not yet put in service.
struct Attempt {
    graph: ComponentGraph,
    /// Topology of the bootstrap pulled during this attempt, if any.
    topology: Option<ComponentsConfig>,
}

/// Handle for poking a reconciler from other threads while it waits for
/// configs.
#[derive(Clone)]
pub struct ReconfigControl {
    source: Arc<dyn SnapshotSource>,
}

impl ReconfigControl {
    /// Ask the snapshot source to deliver its configs again at `generation`.
    pub fn reload_config(&self, generation: u64) {
        self.source.reload(generation);
    }

    /// Cancel the pending pull, and every later one.
    pub fn cancel(&self) {
        self.source.shutdown();
    }
}

/// Builds successive component graphs from config snapshots.
pub struct Reconciler {
    settings: ContainerSettings,
    source: Arc<dyn SnapshotSource>,
    loader: Arc<dyn ModuleLoader>,
    deconstructor: Arc<dyn Deconstructor>,
    generations: GenerationTracker,
    /// Topology of the last bootstrap whose generation went into service.
    topology: Option<ComponentsConfig>,
}

impl Reconciler {
    pub fn new(
        settings: ContainerSettings,
        source: Arc<dyn SnapshotSource>,
        loader: Arc<dyn ModuleLoader>,
        deconstructor: Arc<dyn Deconstructor>,
    ) -> Self {
        Self {
            settings,
            source,
            loader,
            deconstructor,
            generations: GenerationTracker::new(),
            topology: None,
        }
    }

    pub fn settings(&self) -> &ContainerSettings {
        &self.settings
    }

    pub fn generations(&self) -> &GenerationTracker {
        &self.generations
    }

    pub fn control(&self) -> ReconfigControl {
        ReconfigControl {
            source: Arc::clone(&self.source),
        }
    }

    /// Run one reconfiguration against the current graph `old`.
    ///
    /// Blocks until the snapshot source delivers a components snapshot or is
    /// shut down. On error `old` is still the graph in service.
    pub fn new_component_graph(
        &mut self,
        old: &ComponentGraph,
        fallback: &dyn FallbackResolver,
        restart_on_redeploy: bool,
    ) -> Result<GraphUpdate, ReconfigError> {
        self.new_component_graph_with(old, fallback, restart_on_redeploy, |graph| graph)
    }

    /// Like [`new_component_graph`](Self::new_component_graph), but hands the
    /// completed graph to `publish` before the instances of `old` it replaces
    /// are deconstructed.
    ///
    /// Readers served through `publish` never see a graph holding retired
    /// instances.
    pub fn new_component_graph_with<G, P>(
        &mut self,
        old: &ComponentGraph,
        fallback: &dyn FallbackResolver,
        restart_on_redeploy: bool,
        publish: P,
    ) -> Result<GraphUpdate<G>, ReconfigError>
    where
        P: FnOnce(ComponentGraph) -> G,
    {
        let span = info_span!("reconfigure", current = old.generation());
        let _enter = span.enter();

        let mut obsolete_modules = Vec::new();
        let attempt = match self.get_config_and_create_graph(old, restart_on_redeploy, &mut obsolete_modules) {
            Ok(Some(attempt)) => attempt,
            Ok(None) => {
                self.invalidate_generation();
                debug!("config retrieval cancelled");
                return Ok(GraphUpdate::Cancelled);
            }
            Err(err) => return Err(self.fail(old, None, err)),
        };

        let Attempt { mut graph, topology } = attempt;
        graph.reuse_nodes(old);
        if let Err(err) = graph.complete(fallback) {
            return Err(self.fail(old, Some(&graph), err.into()));
        }

        if topology.is_some() {
            self.topology = topology;
        }
        let retired = retired_instances(old, &graph);
        let generation = graph.generation();
        let components = graph.len();

        let published = publish(graph);
        info!(generation, components, "new component graph in service");

        debug!(retired = retired.len(), modules = obsolete_modules.len(), "retiring components");
        self.deconstructor.deconstruct(retired, obsolete_modules);
        Ok(GraphUpdate::Applied(published))
    }

    /// Raise the generation floor past everything the source has delivered.
    fn invalidate_generation(&mut self) {
        self.generations
            .invalidate(self.source.bootstrap_generation(), self.source.components_generation());
    }

    /// Record a failed attempt and release what it constructed.
    fn fail(&mut self, old: &ComponentGraph, partial: Option<&ComponentGraph>, err: ReconfigError) -> ReconfigError {
        self.invalidate_generation();
        warn!(
            least_generation = self.generations.least_generation(),
            error = %err,
            "{}",
            new_graph_error_message(old, &err)
        );

        if let Some(partial) = partial {
            let orphaned = retired_instances(partial, old);
            if !orphaned.is_empty() {
                debug!(count = orphaned.len(), "releasing instances of failed graph");
                self.deconstructor.deconstruct(orphaned, Vec::new());
            }
        }
        err
    }

    /// Pull snapshots until a components snapshot arrives.
    ///
    /// Returns `None` if the pull was cancelled.
    fn get_config_and_create_graph(
        &mut self,
        old: &ComponentGraph,
        restart_on_redeploy: bool,
        obsolete_modules: &mut Vec<ModuleRef>,
    ) -> Result<Option<Attempt>, ReconfigError> {
        let mut keys = old.config_keys();
        let mut bootstrap_topology: Option<ComponentsConfig> = None;

        loop {
            let snapshot = match self.source.get_snapshot(
                &keys,
                self.generations.least_generation(),
                restart_on_redeploy,
            ) {
                Ok(snapshot) => snapshot,
                Err(SnapshotError::Cancelled) => return Ok(None),
                Err(SnapshotError::Failed(reason)) => return Err(ReconfigError::Snapshot(reason)),
            };

            match snapshot {
                Snapshot::Bootstrap(configs) => {
                    let generation = self.source.bootstrap_generation();
                    self.generations.check_bootstrap(generation)?;
                    debug!(
                        generation,
                        components_generation = self.source.components_generation(),
                        previous = ?self.generations.previous(),
                        "got new bootstrap generation"
                    );

                    obsolete_modules.extend(self.install_modules(&configs)?);
                    let topology: ComponentsConfig = get_config(&configs, &self.settings.components_key())?;
                    let graph = self.create_components_graph(&topology, generation)?;
                    keys = graph.config_keys();
                    bootstrap_topology = Some(topology);
                }
                Snapshot::Components(configs) => {
                    let generation = self.source.components_generation();
                    debug!(
                        generation,
                        bootstrap_generation = self.source.bootstrap_generation(),
                        "got components configs"
                    );

                    // Components snapshots may leave out the topology and
                    // rely on the one from the last bootstrap.
                    let key = self.settings.components_key();
                    let topology = match bootstrap_topology.as_ref().or(self.topology.as_ref()) {
                        None => return Err(ReconfigError::TopologyUnavailable),
                        Some(_) if configs.contains_key(&key) => get_config(&configs, &key)?,
                        Some(last) => last.clone(),
                    };

                    let mut graph = self.create_components_graph(&topology, generation)?;
                    graph.set_available_configs(configs);
                    return Ok(Some(Attempt {
                        graph,
                        topology: bootstrap_topology,
                    }));
                }
            }
        }
    }

    fn install_modules(&self, configs: &ConfigSet) -> Result<Vec<ModuleRef>, ReconfigError> {
        let modules: ModulesConfig = get_config(configs, &self.settings.modules_key())?;
        Ok(self.loader.use_modules(&modules.modules))
    }

    /// Build an unconstructed graph from `topology`.
    fn create_components_graph(
        &mut self,
        topology: &ComponentsConfig,
        generation: u64,
    ) -> Result<ComponentGraph, ReconfigError> {
        self.generations.record(generation);

        let mut graph = ComponentGraph::new(generation);

        for decl in &topology.components {
            let spec = decl.class_spec();
            let class = self.loader.resolve_class(&spec)?;
            graph.add(Node::from_resolved(
                decl.id.clone(),
                spec,
                decl.config_id.clone(),
                class,
                Arc::clone(&self.loader),
            ))?;
        }

        for decl in &topology.components {
            for inject in &decl.inject {
                graph.inject(&decl.id, inject.id.clone())?;
            }
        }

        Ok(graph)
    }

    /// Stop the snapshot source and deconstruct every instance of `graph`.
    ///
    /// Modules stay loaded.
    pub fn shutdown(&self, graph: &ComponentGraph, deconstructor: &dyn Deconstructor) {
        self.source.shutdown();
        let instances: Vec<Instance> = graph
            .all_constructed_components_and_providers()
            .into_iter()
            .collect();
        info!(generation = graph.generation(), count = instances.len(), "shutting down container");
        deconstructor.deconstruct(instances, Vec::new());
    }

    /// Ask the snapshot source to deliver its configs again at `generation`.
    pub fn reload_config(&self, generation: u64) {
        self.source.reload(generation);
    }
}

/// Every instance of `from` that `kept` does not hold.
fn retired_instances(from: &ComponentGraph, kept: &ComponentGraph) -> Vec<Instance> {
    let live: IndexSet<Instance> = kept.all_constructed_components_and_providers();
    from.all_constructed_components_and_providers()
        .into_iter()
        .filter(|instance| !live.contains(instance))
        .collect()
}

fn new_graph_error_message(old: &ComponentGraph, err: &ReconfigError) -> String {
    let mut message = if old.is_empty() {
        String::from("Failed to set up first component graph")
    } else {
        String::from("Failed to set up new component graph")
    };
    if err.is_construction_failure() {
        message.push_str(" due to error when constructing one of the components");
    }
    if !old.is_empty() {
        message.push_str(". Retaining previous component generation.");
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConstructionError, GraphError};
    use crate::graph::ComponentId;

    fn construction_failure() -> ReconfigError {
        ReconfigError::Graph(GraphError::ComponentConstructor {
            id: ComponentId::from("e"),
            source: ConstructionError::AlreadyFailed,
        })
    }

    #[test]
    fn error_message_for_first_graph() {
        let empty = ComponentGraph::default();

        assert_eq!(
            new_graph_error_message(&empty, &construction_failure()),
            "Failed to set up first component graph due to error when constructing one of the components"
        );
        assert_eq!(
            new_graph_error_message(&empty, &ReconfigError::TopologyUnavailable),
            "Failed to set up first component graph"
        );
    }

    #[test]
    fn error_message_for_later_graph() {
        use crate::component::{Component, ComponentClass};
        use crate::module::ClassSpec;

        struct Unit;
        impl Component for Unit {}

        let class = Arc::new(ComponentClass::builder::<Unit>("Unit").build(|_| Ok(Unit)));
        let mut current = ComponentGraph::new(3);
        current
            .add(Node::component("unit", ClassSpec::new("m", "Unit"), "", class))
            .unwrap();

        assert_eq!(
            new_graph_error_message(&current, &construction_failure()),
            "Failed to set up new component graph due to error when constructing one of the components. Retaining previous component generation."
        );
        assert_eq!(
            new_graph_error_message(&current, &ReconfigError::TopologyUnavailable),
            "Failed to set up new component graph. Retaining previous component generation."
        );
    }

    #[test]
    fn graph_update_accessors() {
        assert!(GraphUpdate::<ComponentGraph>::Cancelled.is_cancelled());
        assert!(GraphUpdate::<ComponentGraph>::Cancelled.into_graph().is_none());

        let applied = GraphUpdate::Applied(ComponentGraph::new(1));
        assert!(!applied.is_cancelled());
        assert_eq!(applied.into_graph().map(|graph| graph.generation()), Some(1));
    }
}
