//! Constructor arguments.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::{downcast, Component};
use crate::config::ConfigKey;
use crate::error::ConstructionError;
use crate::graph::ComponentId;

/// A single resolved constructor argument.
#[derive(Clone)]
pub enum Argument {
    /// An injected component or a fallback binding.
    Component(Arc<dyn Component>),

    /// A config payload, deserialized lazily by the constructor.
    Config {
        key: ConfigKey,
        value: serde_json::Value,
    },
}

/// Arguments for a [`ComponentClass`](super::ComponentClass) constructor,
/// in the order the class declared its parameters.
#[derive(Clone, Default)]
pub struct Arguments {
    values: Vec<Argument>,
}

impl Arguments {
    pub fn new(values: Vec<Argument>) -> Self {
        Self { values }
    }

    /// Get the component argument at `index` as its concrete type.
    pub fn component<T: Component>(&self, index: usize) -> Result<Arc<T>, ConstructionError> {
        match self.values.get(index) {
            Some(Argument::Component(component)) => {
                downcast::<T>(component).ok_or(ConstructionError::ArgumentType {
                    index,
                    expected: std::any::type_name::<T>(),
                })
            }
            _ => Err(ConstructionError::ArgumentType {
                index,
                expected: std::any::type_name::<T>(),
            }),
        }
    }

    /// Deserialize the config argument at `index`.
    pub fn config<C: DeserializeOwned>(&self, index: usize) -> Result<C, ConstructionError> {
        match self.values.get(index) {
            Some(Argument::Config { key, value }) => serde_json::from_value(value.clone())
                .map_err(|source| ConstructionError::InvalidConfig {
                    key: key.clone(),
                    source,
                }),
            _ => Err(ConstructionError::ArgumentType {
                index,
                expected: "config",
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Arguments for a [`ContextClass`](super::ContextClass) constructor.
///
/// Contexts are not matched parameter by parameter. They see every injected
/// component and every resource built from their declared resource classes.
#[derive(Clone, Default)]
pub struct ContextArguments {
    injected: Vec<(ComponentId, Arc<dyn Component>)>,
    resources: Vec<Arc<dyn Component>>,
}

impl ContextArguments {
    pub fn new(
        injected: Vec<(ComponentId, Arc<dyn Component>)>,
        resources: Vec<Arc<dyn Component>>,
    ) -> Self {
        Self { injected, resources }
    }

    /// Injected components with their ids, in declaration order.
    pub fn injected(&self) -> &[(ComponentId, Arc<dyn Component>)] {
        &self.injected
    }

    /// Injected components of type `T`.
    pub fn injected_of<T: Component>(&self) -> Vec<Arc<T>> {
        self.injected
            .iter()
            .filter_map(|(_, component)| downcast::<T>(component))
            .collect()
    }

    /// Resources, in the order the context class declared them.
    pub fn resources(&self) -> &[Arc<dyn Component>] {
        &self.resources
    }

    /// Get the resource at `index` as its concrete type.
    pub fn resource<T: Component>(&self, index: usize) -> Result<Arc<T>, ConstructionError> {
        self.resources
            .get(index)
            .and_then(downcast::<T>)
            .ok_or(ConstructionError::ArgumentType {
                index,
                expected: std::any::type_name::<T>(),
            })
    }
}
