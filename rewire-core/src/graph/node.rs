//! Graph Nodes
//!
//! This module defines the nodes that live in a component graph.
//!
//! A node is one declared component: its identity, the class it is built
//! from, the components injected into it, and, once constructed, the
//! instance it produced.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::component::{
    downcast, Argument, Arguments, Component, ComponentClass, Constructed, ContextArguments,
    ContextClass, Parameter, TypeKey,
};
use crate::config::{ConfigKey, ConfigSet};
use crate::error::ConstructionError;
use crate::module::{ClassSpec, ModuleLoader, ResolvedClass};
use crate::resolver::FallbackResolver;

/// Declared identity of a component, unique within a graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ComponentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ComponentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identity of a constructed instance.
///
/// Handed out once per construction and never reused, so two instances are
/// the same instance exactly when their handles are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceHandle(u64);

impl InstanceHandle {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw handle value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A constructed object together with its handle.
///
/// Cloning shares the object. Equality and hashing look at the handle only.
#[derive(Clone)]
pub struct Instance {
    handle: InstanceHandle,
    value: Arc<dyn Component>,
}

impl Instance {
    pub(crate) fn new(value: Arc<dyn Component>) -> Self {
        Self {
            handle: InstanceHandle::next(),
            value,
        }
    }

    pub fn handle(&self) -> InstanceHandle {
        self.handle
    }

    pub fn value(&self) -> &Arc<dyn Component> {
        &self.value
    }

    /// Get the instance as its concrete type.
    pub fn downcast<T: Component>(&self) -> Option<Arc<T>> {
        downcast::<T>(&self.value)
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for Instance {}

impl std::hash::Hash for Instance {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.handle.hash(state);
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Instance").field(&self.handle).finish()
    }
}

/// Construction state of a node.
///
/// `Constructed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unconstructed,
    Constructed,
    Failed,
}

/// How a node produces its instance.
#[derive(Clone)]
pub enum NodeKind {
    /// A plain component: arguments are matched to declared parameters.
    Component(Arc<ComponentClass>),

    /// A context: resources are resolved through the loader, then the context
    /// is handed every injected component and every resource.
    Context {
        class: Arc<ContextClass>,
        loader: Arc<dyn ModuleLoader>,
    },
}

impl NodeKind {
    fn instance_type(&self) -> TypeKey {
        match self {
            NodeKind::Component(class) => class.instance_type(),
            NodeKind::Context { class, .. } => class.instance_type(),
        }
    }

    fn is_context(&self) -> bool {
        matches!(self, NodeKind::Context { .. })
    }
}

/// A constructed dependency, as seen by the node being constructed.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub id: ComponentId,
    pub instance_type: TypeKey,
    pub instance: Instance,
}

/// Inputs for [`Node::construct_instance`].
///
/// Dependencies appear in the order the node injected them.
pub struct ConstructionContext<'a> {
    pub dependencies: Vec<Dependency>,
    pub fallback: &'a dyn FallbackResolver,
    pub configs: &'a ConfigSet,
}

/// A node in the component graph.
pub struct Node {
    /// Unique identifier for this node.
    id: ComponentId,

    /// Where the class comes from.
    class_spec: ClassSpec,

    /// Config id used to look up the configs the class reads.
    config_id: String,

    kind: NodeKind,

    /// Components injected into this node, in declaration order.
    /// Fixed once construction has started.
    injected: SmallVec<[ComponentId; 4]>,

    state: NodeState,

    /// The instance, once constructed.
    instance: Option<Instance>,

    /// Objects built alongside the instance: providers, context resources.
    auxiliaries: Vec<Instance>,
}

impl Node {
    /// Create a node for a plain component class.
    pub fn component(
        id: impl Into<ComponentId>,
        class_spec: ClassSpec,
        config_id: impl Into<String>,
        class: Arc<ComponentClass>,
    ) -> Self {
        Self::new(id.into(), class_spec, config_id.into(), NodeKind::Component(class))
    }

    /// Create a node for a context class.
    pub fn context(
        id: impl Into<ComponentId>,
        class_spec: ClassSpec,
        config_id: impl Into<String>,
        class: Arc<ContextClass>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        Self::new(
            id.into(),
            class_spec,
            config_id.into(),
            NodeKind::Context { class, loader },
        )
    }

    /// Create the node variant matching a resolved class.
    pub fn from_resolved(
        id: impl Into<ComponentId>,
        class_spec: ClassSpec,
        config_id: impl Into<String>,
        class: ResolvedClass,
        loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        match class {
            ResolvedClass::Component(class) => Self::component(id, class_spec, config_id, class),
            ResolvedClass::Context(class) => Self::context(id, class_spec, config_id, class, loader),
        }
    }

    fn new(id: ComponentId, class_spec: ClassSpec, config_id: String, kind: NodeKind) -> Self {
        Self {
            id,
            class_spec,
            config_id,
            kind,
            injected: SmallVec::new(),
            state: NodeState::Unconstructed,
            instance: None,
            auxiliaries: Vec::new(),
        }
    }

    /// Get the node's ID.
    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    pub fn class_spec(&self) -> &ClassSpec {
        &self.class_spec
    }

    pub fn config_id(&self) -> &str {
        &self.config_id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_context(&self) -> bool {
        self.kind.is_context()
    }

    /// The type of the instance this node produces.
    pub fn instance_type(&self) -> TypeKey {
        self.kind.instance_type()
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_constructed(&self) -> bool {
        self.state == NodeState::Constructed
    }

    pub fn instance(&self) -> Option<&Instance> {
        self.instance.as_ref()
    }

    pub fn auxiliaries(&self) -> &[Instance] {
        &self.auxiliaries
    }

    /// Components injected into this node.
    pub fn injected(&self) -> &[ComponentId] {
        &self.injected
    }

    /// Declare that `dependency` is injected into this node.
    ///
    /// # Panics
    ///
    /// Panics once construction has been attempted: the dependency list of a
    /// node is fixed before it is built.
    pub fn inject(&mut self, dependency: impl Into<ComponentId>) {
        assert_eq!(
            self.state,
            NodeState::Unconstructed,
            "cannot inject into component '{}' after construction",
            self.id
        );
        self.injected.push(dependency.into());
    }

    /// Keys of the configs this node's constructor reads.
    ///
    /// For contexts these are the configs of the resource classes, which
    /// are read under the context's config id. Resources that cannot be
    /// resolved contribute nothing here and fail at construction.
    pub fn config_keys(&self) -> Vec<ConfigKey> {
        let key = |name: &str| ConfigKey::new(name, self.config_id.clone());
        match &self.kind {
            NodeKind::Component(class) => class.config_names().map(&key).collect(),
            NodeKind::Context { class, loader } => class
                .resources()
                .iter()
                .filter_map(|spec| match loader.resolve_class(spec) {
                    Ok(ResolvedClass::Component(resource)) => Some(resource),
                    _ => None,
                })
                .flat_map(|resource| resource.config_names().map(&key).collect::<Vec<_>>())
                .collect(),
        }
    }

    /// Whether `other` declares the same component: same id, class and
    /// config id, producing the same type.
    pub fn same_declaration(&self, other: &Node) -> bool {
        self.id == other.id
            && self.class_spec == other.class_spec
            && self.config_id == other.config_id
            && self.kind.is_context() == other.kind.is_context()
            && self.instance_type() == other.instance_type()
    }

    /// Take over the instance of an equivalent node from a previous graph.
    pub(crate) fn adopt(&mut self, previous: &Node) {
        debug_assert!(previous.is_constructed());
        self.instance = previous.instance.clone();
        self.auxiliaries = previous.auxiliaries.clone();
        self.state = NodeState::Constructed;
    }

    /// Construct this node's instance.
    ///
    /// Does nothing if the node is already constructed. Every dependency in
    /// `ctx` must already be constructed; the graph calls nodes in
    /// dependency order.
    pub fn construct_instance(&mut self, ctx: &ConstructionContext<'_>) -> Result<(), ConstructionError> {
        match self.state {
            NodeState::Constructed => return Ok(()),
            NodeState::Failed => return Err(ConstructionError::AlreadyFailed),
            NodeState::Unconstructed => {}
        }

        match self.build(ctx) {
            Ok(constructed) => {
                let instance = Instance::new(constructed.primary);
                debug!(component = %self.id, handle = %instance.handle(), "constructed component");
                self.instance = Some(instance);
                self.auxiliaries = constructed
                    .auxiliaries
                    .into_iter()
                    .map(Instance::new)
                    .collect();
                self.state = NodeState::Constructed;
                Ok(())
            }
            Err(err) => {
                self.state = NodeState::Failed;
                Err(err)
            }
        }
    }

    fn build(&self, ctx: &ConstructionContext<'_>) -> Result<Constructed, ConstructionError> {
        match &self.kind {
            NodeKind::Component(class) => {
                let args = gather_arguments(class.parameters(), &self.config_id, ctx)?;
                class.construct(&args).map_err(ConstructionError::from_constructor)
            }
            NodeKind::Context { class, loader } => {
                let mut resources = Vec::with_capacity(class.resources().len());
                let mut auxiliaries = Vec::new();

                for spec in class.resources() {
                    let resource = match loader.resolve_class(spec)? {
                        ResolvedClass::Component(resource) => resource,
                        ResolvedClass::Context(_) => {
                            return Err(ConstructionError::NestedContext { spec: spec.clone() })
                        }
                    };
                    let args = gather_arguments(resource.parameters(), &self.config_id, ctx)?;
                    let built = resource
                        .construct(&args)
                        .map_err(ConstructionError::from_constructor)?;

                    resources.push(Arc::clone(&built.primary));
                    auxiliaries.push(built.primary);
                    auxiliaries.extend(built.auxiliaries);
                }

                let injected = ctx
                    .dependencies
                    .iter()
                    .map(|dependency| (dependency.id.clone(), Arc::clone(dependency.instance.value())))
                    .collect();
                let args = ContextArguments::new(injected, resources);
                let primary = class
                    .construct(&args)
                    .map_err(ConstructionError::from_constructor)?;

                Ok(Constructed {
                    primary,
                    auxiliaries,
                })
            }
        }
    }
}

/// Resolve declared parameters to arguments.
///
/// Component parameters take the single injected dependency of that type,
/// then fall back to the resolver. Config parameters read the config with
/// the parameter's name under the node's config id.
fn gather_arguments(
    parameters: &[Parameter],
    config_id: &str,
    ctx: &ConstructionContext<'_>,
) -> Result<Arguments, ConstructionError> {
    let mut values = Vec::with_capacity(parameters.len());

    for parameter in parameters {
        let argument = match parameter {
            Parameter::Component(ty) => {
                let candidates: Vec<&Dependency> = ctx
                    .dependencies
                    .iter()
                    .filter(|dependency| dependency.instance_type == *ty)
                    .collect();

                match candidates.as_slice() {
                    [single] => Argument::Component(Arc::clone(single.instance.value())),
                    [] => ctx
                        .fallback
                        .resolve(ty)
                        .map(Argument::Component)
                        .ok_or(ConstructionError::MissingBinding {
                            type_name: ty.name(),
                        })?,
                    many => {
                        return Err(ConstructionError::AmbiguousDependency {
                            type_name: ty.name(),
                            candidates: many.iter().map(|dependency| dependency.id.clone()).collect(),
                        })
                    }
                }
            }
            Parameter::Config(name) => {
                let key = ConfigKey::new(name.clone(), config_id);
                let value = ctx
                    .configs
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| ConstructionError::MissingConfig { key: key.clone() })?;
                Argument::Config { key, value }
            }
        };
        values.push(argument);
    }

    Ok(Arguments::new(values))
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("class_spec", &self.class_spec)
            .field("config_id", &self.config_id)
            .field("context", &self.is_context())
            .field("injected", &self.injected)
            .field("state", &self.state)
            .field("instance", &self.instance)
            .finish()
    }
}
