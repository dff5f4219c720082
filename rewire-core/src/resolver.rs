//! Fallback resolution for component parameters that no injected component
//! satisfies.

use std::sync::Arc;

use dashmap::DashMap;

use crate::component::{Component, TypeKey};

/// Supplies components the graph does not declare, typically host services.
pub trait FallbackResolver: Send + Sync {
    /// Return a component of type `ty`, or `None` to fail construction with
    /// a missing binding.
    fn resolve(&self, ty: &TypeKey) -> Option<Arc<dyn Component>>;
}

/// Resolver that never supplies anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFallback;

impl FallbackResolver for NoFallback {
    fn resolve(&self, _ty: &TypeKey) -> Option<Arc<dyn Component>> {
        None
    }
}

/// Resolver backed by explicit per-type bindings.
#[derive(Default)]
pub struct FallbackRegistry {
    bindings: DashMap<TypeKey, Arc<dyn Component>>,
}

impl FallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `component` as the fallback for its own type, replacing any
    /// earlier binding.
    pub fn bind<T: Component>(&self, component: Arc<T>) {
        self.bindings.insert(TypeKey::of::<T>(), component);
    }

    pub fn with_binding<T: Component>(self, component: Arc<T>) -> Self {
        self.bind(component);
        self
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl FallbackResolver for FallbackRegistry {
    fn resolve(&self, ty: &TypeKey) -> Option<Arc<dyn Component>> {
        self.bindings.get(ty).map(|binding| Arc::clone(binding.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Metrics;
    impl Component for Metrics {}

    struct Tracer;
    impl Component for Tracer {}

    #[test]
    fn resolves_bound_types_only() {
        let metrics = Arc::new(Metrics);
        let registry = FallbackRegistry::new().with_binding(metrics.clone());

        let resolved = registry.resolve(&TypeKey::of::<Metrics>()).unwrap();
        let resolved = crate::component::downcast::<Metrics>(&resolved).unwrap();
        assert!(Arc::ptr_eq(&resolved, &metrics));
        assert!(registry.resolve(&TypeKey::of::<Tracer>()).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn no_fallback_resolves_nothing() {
        assert!(NoFallback.resolve(&TypeKey::of::<Metrics>()).is_none());
    }
}
