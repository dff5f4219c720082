//! Component Model
//!
//! Everything the container builds is a [`Component`]: a long-lived object
//! shared behind an `Arc` and released through [`Component::deconstruct`]
//! once it leaves the live graph.
//!
//! Classes describe how to build components. A [`ComponentClass`] declares
//! the constructor parameters it needs (other components by type, configs by
//! name) and a constructor closure. A [`ContextClass`] is the richer variant:
//! it pulls a set of resource classes through the module loader and receives
//! them, together with every injected component, before producing its
//! instance.
//!
//! Types are identified by [`TypeKey`], which is how injected dependencies
//! and fallback bindings are matched against constructor parameters.

mod arguments;
mod class;

pub use arguments::{Argument, Arguments, ContextArguments};
pub use class::{ClassBuilder, ComponentClass, Constructed, ContextBuilder, ContextClass, Parameter};

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::BoxError;

/// Conversion into `Any`, implemented for every sized component type.
///
/// This is what lets a type-erased `Arc<dyn Component>` be turned back into
/// the concrete `Arc<T>` a constructor asks for.
pub trait AsAny: Send + Sync + 'static {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A long-lived object managed by the container.
pub trait Component: AsAny {
    /// Release the resources held by this instance.
    ///
    /// Called exactly once, after the instance is no longer part of the live
    /// graph. Errors are logged by the deconstructor and never propagate.
    fn deconstruct(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// A component that produces another component.
///
/// The provider itself is kept alive next to the provided instance and is
/// deconstructed with it.
pub trait Provider: Component {
    type Output: Component;

    fn provide(&self) -> Result<Arc<Self::Output>, BoxError>;
}

/// Downcast a type-erased component to its concrete type.
pub fn downcast<T: Component>(component: &Arc<dyn Component>) -> Option<Arc<T>> {
    <dyn Component as AsAny>::into_any(Arc::clone(component))
        .downcast::<T>()
        .ok()
}

/// Runtime identity of a component type.
///
/// Equality and hashing use the `TypeId` only; the name is kept for
/// diagnostics.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Get the Rust type name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Clock;
    impl Component for Clock {}

    struct Cache;
    impl Component for Cache {}

    #[test]
    fn downcast_recovers_concrete_type() {
        let erased: Arc<dyn Component> = Arc::new(Clock);

        assert!(downcast::<Clock>(&erased).is_some());
        assert!(downcast::<Cache>(&erased).is_none());
    }

    #[test]
    fn downcast_preserves_identity() {
        let clock = Arc::new(Clock);
        let erased: Arc<dyn Component> = clock.clone();

        let recovered = downcast::<Clock>(&erased).unwrap();
        assert!(Arc::ptr_eq(&clock, &recovered));
    }

    #[test]
    fn type_keys_compare_by_type() {
        assert_eq!(TypeKey::of::<Clock>(), TypeKey::of::<Clock>());
        assert_ne!(TypeKey::of::<Clock>(), TypeKey::of::<Cache>());
        assert!(TypeKey::of::<Clock>().name().ends_with("Clock"));
    }
}
