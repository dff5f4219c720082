//! Component Classes
//!
//! A class is the instantiable descriptor a module exports under a name. The
//! container never calls user constructors directly: it gathers the
//! arguments a class declared, then hands them to the class.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{Arguments, Component, ContextArguments, Provider, TypeKey};
use crate::error::BoxError;
use crate::module::ClassSpec;

/// A declared constructor parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameter {
    /// A component of the given type: an injected node, or a fallback binding.
    Component(TypeKey),

    /// The config with this name, for the node's config id.
    Config(String),
}

/// Everything a single constructor call produced.
///
/// `primary` is the node's instance. `auxiliaries` are objects created along
/// the way (providers, context resources) that share its lifecycle.
pub struct Constructed {
    pub(crate) primary: Arc<dyn Component>,
    pub(crate) auxiliaries: Vec<Arc<dyn Component>>,
}

type ConstructFn = dyn Fn(&Arguments) -> Result<Constructed, BoxError> + Send + Sync;
type ContextFn = dyn Fn(&ContextArguments) -> Result<Arc<dyn Component>, BoxError> + Send + Sync;

/// A plain component class.
pub struct ComponentClass {
    name: String,
    instance_type: TypeKey,
    parameters: Vec<Parameter>,
    construct: Box<ConstructFn>,
}

impl ComponentClass {
    /// Start describing a class whose instances are of type `T`.
    pub fn builder<T: Component>(name: impl Into<String>) -> ClassBuilder<T> {
        ClassBuilder {
            name: name.into(),
            parameters: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type of the instances this class produces.
    pub fn instance_type(&self) -> TypeKey {
        self.instance_type
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Names of the configs this class reads.
    pub fn config_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().filter_map(|parameter| match parameter {
            Parameter::Config(name) => Some(name.as_str()),
            Parameter::Component(_) => None,
        })
    }

    pub(crate) fn construct(&self, args: &Arguments) -> Result<Constructed, BoxError> {
        (self.construct)(args)
    }
}

impl fmt::Debug for ComponentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentClass")
            .field("name", &self.name)
            .field("instance_type", &self.instance_type)
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// Builder for [`ComponentClass`].
///
/// Parameters are positional: the n-th call to [`component`](Self::component)
/// or [`config`](Self::config) is argument `n` of the constructor.
pub struct ClassBuilder<T> {
    name: String,
    parameters: Vec<Parameter>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component> ClassBuilder<T> {
    /// Declare a dependency on a component of type `D`.
    pub fn component<D: Component>(mut self) -> Self {
        self.parameters.push(Parameter::Component(TypeKey::of::<D>()));
        self
    }

    /// Declare a dependency on the config named `name`.
    pub fn config(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(Parameter::Config(name.into()));
        self
    }

    /// Finish with a constructor producing the instance directly.
    pub fn build<F>(self, constructor: F) -> ComponentClass
    where
        F: Fn(&Arguments) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        ComponentClass {
            name: self.name,
            instance_type: TypeKey::of::<T>(),
            parameters: self.parameters,
            construct: Box::new(move |args| {
                let primary: Arc<dyn Component> = Arc::new(constructor(args)?);
                Ok(Constructed {
                    primary,
                    auxiliaries: Vec::new(),
                })
            }),
        }
    }

    /// Finish with a constructor producing a provider of the instance.
    ///
    /// The provider is asked for the instance once, right after it is built,
    /// and is then kept as an auxiliary of the node.
    pub fn build_provider<P, F>(self, constructor: F) -> ComponentClass
    where
        P: Provider<Output = T>,
        F: Fn(&Arguments) -> Result<P, BoxError> + Send + Sync + 'static,
    {
        ComponentClass {
            name: self.name,
            instance_type: TypeKey::of::<T>(),
            parameters: self.parameters,
            construct: Box::new(move |args| {
                let provider = Arc::new(constructor(args)?);
                let primary: Arc<dyn Component> = provider.provide()?;
                let provider: Arc<dyn Component> = provider;
                Ok(Constructed {
                    primary,
                    auxiliaries: vec![provider],
                })
            }),
        }
    }
}

/// A context component class.
///
/// Contexts aggregate: they declare resource classes that are resolved
/// through the module loader and built when the context is built, and they
/// receive every component injected into their node.
pub struct ContextClass {
    name: String,
    instance_type: TypeKey,
    resources: Vec<ClassSpec>,
    construct: Box<ContextFn>,
}

impl ContextClass {
    pub fn builder<T: Component>(name: impl Into<String>) -> ContextBuilder<T> {
        ContextBuilder {
            name: name.into(),
            resources: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance_type(&self) -> TypeKey {
        self.instance_type
    }

    /// Resource classes built before the context itself.
    pub fn resources(&self) -> &[ClassSpec] {
        &self.resources
    }

    pub(crate) fn construct(&self, args: &ContextArguments) -> Result<Arc<dyn Component>, BoxError> {
        (self.construct)(args)
    }
}

impl fmt::Debug for ContextClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextClass")
            .field("name", &self.name)
            .field("instance_type", &self.instance_type)
            .field("resources", &self.resources)
            .finish()
    }
}

/// Builder for [`ContextClass`].
pub struct ContextBuilder<T> {
    name: String,
    resources: Vec<ClassSpec>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component> ContextBuilder<T> {
    /// Declare a resource class, resolved through the module loader.
    pub fn resource(mut self, spec: ClassSpec) -> Self {
        self.resources.push(spec);
        self
    }

    pub fn build<F>(self, constructor: F) -> ContextClass
    where
        F: Fn(&ContextArguments) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        ContextClass {
            name: self.name,
            instance_type: TypeKey::of::<T>(),
            resources: self.resources,
            construct: Box::new(move |args| {
                let instance: Arc<dyn Component> = Arc::new(constructor(args)?);
                Ok(instance)
            }),
        }
    }
}
