use crate::error::{DomoticError, Result};
use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;

type ModuleHandle = Arc<dyn Any + Send + Sync>;
type ModuleFactory = Arc<dyn Fn(&ModuleLoader) -> anyhow::Result<ModuleHandle> + Send + Sync>;

/// Resolves additional code by name on behalf of the subsystems.
///
/// Factories can be registered at any time; a module is built the first time
/// it is loaded and the same instance is handed out afterwards. Factories get
/// the loader itself so a module can pull in the modules it depends on.
#[derive(Clone, Default)]
pub struct ModuleLoader {
    factories: Arc<DashMap<String, ModuleFactory>>,
    cache: Arc<DashMap<String, ModuleHandle>>,
}

impl ModuleLoader {
    /// Loader with no modules registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module factory under `name`, replacing any previous one.
    ///
    /// An already loaded instance stays cached until [`ModuleLoader::unload`].
    pub fn register<T, F>(&self, name: impl Into<String>, factory: F) -> &Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ModuleLoader) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let factory: ModuleFactory =
            Arc::new(move |loader| factory(loader).map(|module| Arc::new(module) as ModuleHandle));
        self.factories.insert(name.into(), factory);
        self
    }

    /// Resolve a module, building it on first use.
    pub fn load<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let handle = match self.cache.get(name) {
            Some(cached) => cached.value().clone(),
            None => self.build(name)?,
        };
        handle
            .downcast::<T>()
            .map_err(|_| DomoticError::DowncastFailed {
                type_name: std::any::type_name::<T>().to_string(),
            })
    }

    fn build(&self, name: &str) -> Result<ModuleHandle> {
        // Clone the factory out so the map is not locked while it runs.
        let factory = self
            .factories
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DomoticError::ModuleNotFound {
                name: name.to_string(),
            })?;

        tracing::debug!(module = name, "loading module");
        let handle = factory(self).map_err(|e| DomoticError::ModuleLoadFailed {
            name: name.to_string(),
            message: format!("{e:#}"),
        })?;

        // Another caller may have won the race; keep whichever landed first.
        Ok(self.cache.entry(name.to_string()).or_insert(handle).value().clone())
    }

    /// Whether a factory exists for `name`.
    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Whether `name` has been built and cached.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.cache.contains_key(name)
    }

    /// Drop the cached instance so the next load builds a fresh one.
    pub fn unload(&self, name: &str) -> bool {
        self.cache.remove(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Codec {
        name: &'static str,
    }

    struct Transport {
        codec: Arc<Codec>,
    }

    #[test]
    fn test_load_builds_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let loader = ModuleLoader::new();
        let counter = Arc::clone(&builds);
        loader.register("codec", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Codec { name: "json" })
        });

        let first = loader.load::<Codec>("codec").unwrap();
        let second = loader.load::<Codec>("codec").unwrap();
        assert_eq!(first.name, "json");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(loader.is_loaded("codec"));
    }

    #[test]
    fn test_module_resolves_dependencies() {
        let loader = ModuleLoader::new();
        loader.register("codec", |_| Ok(Codec { name: "cbor" }));
        loader.register("transport", |loader| {
            Ok(Transport {
                codec: loader.load::<Codec>("codec")?,
            })
        });

        let transport = loader.load::<Transport>("transport").unwrap();
        assert_eq!(transport.codec.name, "cbor");
    }

    #[test]
    fn test_unknown_and_mistyped_modules() {
        let loader = ModuleLoader::new();
        loader.register("codec", |_| Ok(Codec { name: "json" }));

        assert!(matches!(
            loader.load::<Codec>("missing"),
            Err(DomoticError::ModuleNotFound { .. })
        ));
        assert!(matches!(
            loader.load::<Transport>("codec"),
            Err(DomoticError::DowncastFailed { .. })
        ));
    }

    #[test]
    fn test_failed_factory_is_not_cached() {
        let loader = ModuleLoader::new();
        loader.register::<Codec, _>("codec", |_| Err(anyhow::anyhow!("no codec installed")));

        let err = loader.load::<Codec>("codec").err().unwrap();
        assert!(err.to_string().contains("no codec installed"));
        assert!(!loader.is_loaded("codec"));
    }

    #[test]
    fn test_unload_rebuilds() {
        let loader = ModuleLoader::new();
        loader.register("codec", |_| Ok(Codec { name: "json" }));
        let first = loader.load::<Codec>("codec").unwrap();
        assert!(loader.unload("codec"));
        let second = loader.load::<Codec>("codec").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
