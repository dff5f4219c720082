//! Modules and Class Resolution
//!
//! A module is a loadable unit exporting named classes. The container only
//! talks to modules through the [`ModuleLoader`] capability: it declares the
//! module set a bootstrap config asks for, resolves class specs to classes,
//! and later unloads modules that dropped out of the set once the components
//! built from them are gone.
//!
//! [`StaticModuleLoader`] is the compiled-in implementation: modules are
//! registered up front and "installing" one only makes its classes
//! resolvable.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::component::{ComponentClass, ContextClass, TypeKey};
use crate::error::ResolveError;

/// Name of a loadable module.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleRef(String);

impl ModuleRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModuleRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ModuleRef {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The implementation descriptor of a component: a class inside a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassSpec {
    pub module: ModuleRef,
    pub class: String,
}

impl ClassSpec {
    pub fn new(module: impl Into<ModuleRef>, class: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            class: class.into(),
        }
    }
}

impl fmt::Display for ClassSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.class)
    }
}

/// A class as returned by the loader, plain or context.
#[derive(Debug, Clone)]
pub enum ResolvedClass {
    Component(Arc<ComponentClass>),
    Context(Arc<ContextClass>),
}

impl ResolvedClass {
    pub fn name(&self) -> &str {
        match self {
            ResolvedClass::Component(class) => class.name(),
            ResolvedClass::Context(class) => class.name(),
        }
    }

    pub fn instance_type(&self) -> TypeKey {
        match self {
            ResolvedClass::Component(class) => class.instance_type(),
            ResolvedClass::Context(class) => class.instance_type(),
        }
    }
}

/// Capability for installing modules and resolving classes from them.
pub trait ModuleLoader: Send + Sync {
    /// Make `modules` the active module set.
    ///
    /// Returns the modules that were active before and are not part of the
    /// new set. They stay loaded until [`unload`](Self::unload) is called for
    /// them, so components built from them can still be deconstructed.
    fn use_modules(&self, modules: &[ModuleRef]) -> Vec<ModuleRef>;

    /// Resolve a class spec against the active module set.
    fn resolve_class(&self, spec: &ClassSpec) -> Result<ResolvedClass, ResolveError>;

    /// Unload modules that are no longer referenced.
    fn unload(&self, modules: &[ModuleRef]);
}

/// A module: a named set of classes.
#[derive(Debug, Clone)]
pub struct Module {
    name: ModuleRef,
    classes: HashMap<String, ResolvedClass>,
}

impl Module {
    pub fn new(name: impl Into<ModuleRef>) -> Self {
        Self {
            name: name.into(),
            classes: HashMap::new(),
        }
    }

    /// Export a plain component class under its name.
    pub fn component(mut self, class: ComponentClass) -> Self {
        self.classes.insert(
            class.name().to_string(),
            ResolvedClass::Component(Arc::new(class)),
        );
        self
    }

    /// Export a context class under its name.
    pub fn context(mut self, class: ContextClass) -> Self {
        self.classes.insert(
            class.name().to_string(),
            ResolvedClass::Context(Arc::new(class)),
        );
        self
    }

    pub fn name(&self) -> &ModuleRef {
        &self.name
    }

    pub fn class(&self, name: &str) -> Option<&ResolvedClass> {
        self.classes.get(name)
    }
}

#[derive(Debug, Default)]
struct ModuleState {
    /// The module set of the last bootstrap config.
    active: IndexSet<ModuleRef>,
    /// Modules loaded and not yet unloaded; a superset of `active`.
    resident: IndexSet<ModuleRef>,
}

/// Module loader over a compiled-in registry of modules.
#[derive(Default)]
pub struct StaticModuleLoader {
    available: DashMap<ModuleRef, Arc<Module>>,
    state: Mutex<ModuleState>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module so that bootstrap configs can install it.
    pub fn register(&self, module: Module) {
        debug!(module = %module.name(), "registering module");
        self.available.insert(module.name().clone(), Arc::new(module));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_module(self, module: Module) -> Self {
        self.register(module);
        self
    }

    pub fn active_modules(&self) -> Vec<ModuleRef> {
        self.state.lock().active.iter().cloned().collect()
    }

    /// Whether the module is loaded, active or awaiting unload.
    pub fn is_resident(&self, module: &ModuleRef) -> bool {
        self.state.lock().resident.contains(module)
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn use_modules(&self, modules: &[ModuleRef]) -> Vec<ModuleRef> {
        let mut state = self.state.lock();

        for module in modules {
            if !self.available.contains_key(module) {
                warn!(module = %module, "declared module is not registered");
            }
        }

        let next: IndexSet<ModuleRef> = modules.iter().cloned().collect();
        let obsolete: Vec<ModuleRef> = state
            .active
            .iter()
            .filter(|module| !next.contains(*module))
            .cloned()
            .collect();

        state.resident.extend(next.iter().cloned());
        state.active = next;

        info!(
            active = state.active.len(),
            obsolete = obsolete.len(),
            "installed module set"
        );
        obsolete
    }

    fn resolve_class(&self, spec: &ClassSpec) -> Result<ResolvedClass, ResolveError> {
        if !self.state.lock().active.contains(&spec.module) {
            return Err(ResolveError::ModuleNotInstalled {
                module: spec.module.clone(),
            });
        }

        self.available
            .get(&spec.module)
            .and_then(|module| module.class(&spec.class).cloned())
            .ok_or_else(|| ResolveError::ClassNotFound { spec: spec.clone() })
    }

    fn unload(&self, modules: &[ModuleRef]) {
        let mut state = self.state.lock();
        for module in modules {
            // Re-declared since it became obsolete.
            if state.active.contains(module) {
                continue;
            }
            if state.resident.shift_remove(module) {
                info!(module = %module, "unloaded module");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;

    struct Greeter;
    impl Component for Greeter {}

    fn loader() -> StaticModuleLoader {
        StaticModuleLoader::new()
            .with_module(
                Module::new("greetings")
                    .component(ComponentClass::builder::<Greeter>("Greeter").build(|_| Ok(Greeter))),
            )
            .with_module(Module::new("extras"))
    }

    #[test]
    fn resolves_classes_from_active_modules() {
        let loader = loader();
        loader.use_modules(&["greetings".into()]);

        let resolved = loader
            .resolve_class(&ClassSpec::new("greetings", "Greeter"))
            .unwrap();
        assert_eq!(resolved.name(), "Greeter");
        assert_eq!(resolved.instance_type(), TypeKey::of::<Greeter>());
    }

    #[test]
    fn inactive_module_is_not_resolvable() {
        let loader = loader();

        assert!(matches!(
            loader.resolve_class(&ClassSpec::new("greetings", "Greeter")),
            Err(ResolveError::ModuleNotInstalled { .. })
        ));
    }

    #[test]
    fn unknown_class_is_reported() {
        let loader = loader();
        loader.use_modules(&["greetings".into()]);

        assert!(matches!(
            loader.resolve_class(&ClassSpec::new("greetings", "Farewell")),
            Err(ResolveError::ClassNotFound { .. })
        ));
    }

    #[test]
    fn obsolete_modules_stay_resident_until_unloaded() {
        let loader = loader();
        loader.use_modules(&["greetings".into(), "extras".into()]);

        let obsolete = loader.use_modules(&["greetings".into()]);
        assert_eq!(obsolete, vec![ModuleRef::from("extras")]);
        assert_eq!(loader.active_modules(), vec![ModuleRef::from("greetings")]);
        assert!(loader.is_resident(&"extras".into()));

        loader.unload(&obsolete);
        assert!(!loader.is_resident(&"extras".into()));
        assert!(loader.is_resident(&"greetings".into()));
    }

    #[test]
    fn unload_skips_redeclared_modules() {
        let loader = loader();
        loader.use_modules(&["extras".into()]);
        let obsolete = loader.use_modules(&[]);
        loader.use_modules(&["extras".into()]);

        loader.unload(&obsolete);
        assert!(loader.is_resident(&"extras".into()));
    }
}
