//! Deconstruction of retired instances.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::graph::Instance;
use crate::module::{ModuleLoader, ModuleRef};

/// Releases instances that left the live graph, then the modules they came
/// from.
///
/// Implementations never fail past this boundary: problems are logged.
pub trait Deconstructor: Send + Sync {
    fn deconstruct(&self, instances: Vec<Instance>, obsolete_modules: Vec<ModuleRef>);
}

/// Calls [`Component::deconstruct`](crate::component::Component::deconstruct)
/// on every instance, in the order given, then unloads the obsolete modules.
#[derive(Default)]
pub struct ComponentDeconstructor {
    loader: Option<Arc<dyn ModuleLoader>>,
}

impl ComponentDeconstructor {
    /// A deconstructor that also unloads modules through `loader`.
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            loader: Some(loader),
        }
    }

    /// A deconstructor that leaves modules alone.
    pub fn without_loader() -> Self {
        Self::default()
    }
}

impl Deconstructor for ComponentDeconstructor {
    fn deconstruct(&self, instances: Vec<Instance>, obsolete_modules: Vec<ModuleRef>) {
        debug!(
            count = instances.len(),
            modules = obsolete_modules.len(),
            "deconstructing"
        );

        for instance in instances {
            match catch_unwind(AssertUnwindSafe(|| instance.value().deconstruct())) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(handle = %instance.handle(), error = %err, "error deconstructing component");
                }
                Err(_) => {
                    error!(handle = %instance.handle(), "component panicked while deconstructing");
                }
            }
        }

        if let Some(loader) = &self.loader {
            if !obsolete_modules.is_empty() {
                loader.unload(&obsolete_modules);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::error::BoxError;
    use crate::module::{Module, StaticModuleLoader};
    use parking_lot::Mutex;

    struct Tracked {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Component for Tracked {
        fn deconstruct(&self) -> Result<(), BoxError> {
            self.log.lock().push(self.name);
            Ok(())
        }
    }

    struct Faulty;

    impl Component for Faulty {
        fn deconstruct(&self) -> Result<(), BoxError> {
            Err("socket already closed".into())
        }
    }

    struct Panicky;

    impl Component for Panicky {
        fn deconstruct(&self) -> Result<(), BoxError> {
            panic!("boom")
        }
    }

    #[test]
    fn failures_do_not_stop_other_instances() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let instances = vec![
            Instance::new(Arc::new(Tracked { name: "first", log: log.clone() })),
            Instance::new(Arc::new(Faulty)),
            Instance::new(Arc::new(Panicky)),
            Instance::new(Arc::new(Tracked { name: "last", log: log.clone() })),
        ];

        ComponentDeconstructor::without_loader().deconstruct(instances, Vec::new());

        assert_eq!(*log.lock(), vec!["first", "last"]);
    }

    #[test]
    fn obsolete_modules_are_unloaded() {
        let loader = Arc::new(StaticModuleLoader::new().with_module(Module::new("legacy")));
        loader.use_modules(&["legacy".into()]);
        let obsolete = loader.use_modules(&[]);

        ComponentDeconstructor::new(loader.clone()).deconstruct(Vec::new(), obsolete);

        assert!(!loader.is_resident(&"legacy".into()));
    }
}
