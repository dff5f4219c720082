//! Error types for rewire-core.
//!
//! Each layer has its own `thiserror` enum so callers can match on the
//! failure they care about. Construction failures are always wrapped in
//! [`GraphError::ComponentConstructor`] together with the id of the node that
//! failed, and reach the caller of a reconfiguration as
//! [`ReconfigError::Graph`].

use thiserror::Error;

use crate::config::ConfigKey;
use crate::graph::ComponentId;
use crate::module::{ClassSpec, ModuleRef};

/// Boxed error returned by user constructors and deconstruction hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures of the module loader while turning a [`ClassSpec`] into a class.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The class lives in a module that is not part of the active module set.
    #[error("module '{module}' is not installed")]
    ModuleNotInstalled { module: ModuleRef },

    /// The module is installed but does not export the class.
    #[error("class '{spec}' not found")]
    ClassNotFound { spec: ClassSpec },
}

/// Failures while producing a single node's instance.
#[derive(Debug, Error)]
pub enum ConstructionError {
    /// The node depends on itself, directly or through other nodes.
    #[error("dependency cycle: {}", format_cycle(.cycle))]
    DependencyCycle { cycle: Vec<ComponentId> },

    /// A dependency was asked for before it had been constructed.
    #[error("dependency '{id}' has not been constructed")]
    NotConstructed { id: ComponentId },

    /// More than one injected component has the requested type.
    #[error("more than one injected component of type {type_name}: {candidates:?}")]
    AmbiguousDependency {
        type_name: &'static str,
        candidates: Vec<ComponentId>,
    },

    /// No injected component and no fallback binding for the requested type.
    #[error("no component or fallback binding for type {type_name}")]
    MissingBinding { type_name: &'static str },

    /// The constructor asked for a config that was not delivered.
    #[error("missing config '{key}'")]
    MissingConfig { key: ConfigKey },

    /// The delivered config does not deserialize into the requested type.
    #[error("invalid config '{key}': {source}")]
    InvalidConfig {
        key: ConfigKey,
        #[source]
        source: serde_json::Error,
    },

    /// A constructor read an argument with the wrong accessor or type.
    #[error("argument {index} is not a {expected}")]
    ArgumentType { index: usize, expected: &'static str },

    /// A context resource resolved to another context class.
    #[error("context resource '{spec}' must be a plain component class")]
    NestedContext { spec: ClassSpec },

    /// The node already failed once; nodes never leave the failed state.
    #[error("construction was already attempted and failed")]
    AlreadyFailed,

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The user constructor returned an error.
    #[error("constructor failed: {0}")]
    Failed(#[source] BoxError),
}

impl ConstructionError {
    /// Convert an error returned by a user constructor.
    ///
    /// Constructors may bubble up a `ConstructionError` raised by the
    /// argument accessors with `?`; those are unwrapped instead of being
    /// reported as opaque constructor failures.
    pub(crate) fn from_constructor(err: BoxError) -> Self {
        match err.downcast::<ConstructionError>() {
            Ok(inner) => *inner,
            Err(other) => ConstructionError::Failed(other),
        }
    }
}

fn format_cycle(cycle: &[ComponentId]) -> String {
    let mut parts: Vec<String> = cycle.iter().map(ToString::to_string).collect();
    if let Some(first) = cycle.first() {
        parts.push(first.to_string());
    }
    parts.join(" -> ")
}

/// Failures of graph assembly and completion.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate component id '{id}'")]
    DuplicateNode { id: ComponentId },

    #[error("unknown component '{id}'")]
    UnknownComponent { id: ComponentId },

    /// A declared injection names a component that is not in the graph.
    #[error("component '{id}' injects unknown component '{dependency}'")]
    MissingDependency {
        id: ComponentId,
        dependency: ComponentId,
    },

    #[error("error constructing component '{id}': {source}")]
    ComponentConstructor {
        id: ComponentId,
        #[source]
        source: ConstructionError,
    },
}

/// Failures of a snapshot source pull.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The pull was interrupted by a shutdown of the source.
    #[error("config retrieval was cancelled")]
    Cancelled,

    #[error("config retrieval failed: {0}")]
    Failed(String),
}

/// Failures of one reconfiguration attempt.
///
/// Whatever the variant, the graph that was current before the attempt is
/// left untouched and remains authoritative.
#[derive(Debug, Error)]
pub enum ReconfigError {
    /// A bootstrap delivery did not advance the config generation.
    #[error("got bootstrap configs out of sequence for config generation {generation}, previous config generation is {previous}")]
    OutOfSequence { generation: u64, previous: u64 },

    /// A components delivery arrived before any bootstrap delivery was applied.
    #[error("components config delivered before any bootstrap config was applied")]
    TopologyUnavailable,

    #[error("missing config '{key}'")]
    MissingConfig { key: ConfigKey },

    #[error("invalid config '{key}': {source}")]
    InvalidConfig {
        key: ConfigKey,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("snapshot source failed: {0}")]
    Snapshot(String),
}

impl ReconfigError {
    /// Whether the attempt failed inside a component constructor.
    pub fn is_construction_failure(&self) -> bool {
        matches!(
            self,
            ReconfigError::Graph(GraphError::ComponentConstructor { .. })
        )
    }

    /// Whether a later delivery can fix the failure.
    ///
    /// Protocol violations are not retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconfigError::OutOfSequence { .. })
    }
}
