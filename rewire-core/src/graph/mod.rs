//! Component Graph
//!
//! This module implements the graph of components that make up one
//! container generation.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph where:
//!
//! - Nodes are declared components, identified by [`ComponentId`]
//! - Edges are injections: if A is injected into B, A is built before B
//!
//! A graph is built fresh for every generation. Before it is completed it
//! adopts the instances of every node that did not change since the previous
//! generation, so only changed nodes and the nodes depending on them are
//! constructed again.
//!
//! # Identity
//!
//! Every constructed object is wrapped in an [`Instance`] carrying a unique
//! [`InstanceHandle`]. Retiring a generation compares handles, never values:
//! the instances to deconstruct are exactly those of the old graph whose
//! handles are missing from the new one.

mod component_graph;
mod node;

pub use component_graph::ComponentGraph;
pub use node::{
    ComponentId, ConstructionContext, Dependency, Instance, InstanceHandle, Node, NodeKind, NodeState,
};
