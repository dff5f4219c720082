//! Rewire Core
//!
//! This crate provides the core runtime for the Rewire live
//! dependency-injection container. It implements:
//!
//! - Component graphs built from declarative topology configs
//! - Incremental reconfiguration that keeps unchanged instances alive
//! - Identity-based retirement of replaced instances and unused modules
//! - A background supervisor publishing the graph in service
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `component`: Component traits, classes and constructor arguments
//! - `graph`: The component graph, its nodes and construction order
//! - `container`: The reconciler and supervisor driving reconfiguration
//! - `snapshot`: Config snapshot sources
//! - `module`: Modules and class resolution
//! - `config`: Config keys and the typed topology configs
//! - `resolver`: Fallback bindings for undeclared dependencies
//! - `deconstruct`: Release of retired instances
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rewire_core::prelude::*;
//!
//! let loader = Arc::new(StaticModuleLoader::new().with_module(
//!     Module::new("app").component(ComponentClass::builder::<Clock>("Clock").build(|_| Ok(Clock))),
//! ));
//! let source = Arc::new(InMemorySnapshotSource::new());
//! let mut reconciler = Reconciler::new(
//!     ContainerSettings::default(),
//!     source.clone(),
//!     loader.clone(),
//!     Arc::new(ComponentDeconstructor::new(loader)),
//! );
//!
//! // Deliver bootstrap and components configs to `source`, then:
//! let update = reconciler.new_component_graph(&ComponentGraph::default(), &NoFallback, false)?;
//! let graph = update.into_graph().expect("not cancelled");
//! let clock = graph.component::<Clock>(&"clock".into());
//! ```

pub mod component;
pub mod config;
pub mod container;
pub mod deconstruct;
pub mod error;
pub mod graph;
pub mod module;
pub mod resolver;
pub mod snapshot;

pub use container::{GraphUpdate, ReconfigControl, Reconciler, Supervisor};
pub use error::{ConstructionError, GraphError, ReconfigError};
pub use graph::{ComponentGraph, ComponentId, Instance};

/// The types needed to declare components and run a container.
pub mod prelude {
    pub use crate::component::{Component, ComponentClass, ContextClass, Provider};
    pub use crate::config::{ComponentDecl, ComponentsConfig, ConfigKey, ConfigSet, ContainerSettings, ModulesConfig};
    pub use crate::container::{GraphUpdate, Reconciler, Supervisor};
    pub use crate::deconstruct::{ComponentDeconstructor, Deconstructor};
    pub use crate::graph::{ComponentGraph, ComponentId, Instance};
    pub use crate::module::{ClassSpec, Module, ModuleLoader, StaticModuleLoader};
    pub use crate::resolver::{FallbackRegistry, NoFallback};
    pub use crate::snapshot::{InMemorySnapshotSource, SnapshotSource};
}
