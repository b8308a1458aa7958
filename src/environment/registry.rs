use super::{ModuleLoader, SubsystemName};
use crate::error::{DomoticError, Result};
use crate::interceptor::{FailureReporter, FatalSink};
use crate::logging::LogHandle;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use strum::IntoEnumIterator;

type SubsystemHandle = Arc<dyn Any + Send + Sync>;
type SubsystemFactory = Box<dyn FnOnce(&Environment) -> anyhow::Result<SubsystemHandle>>;

/// The shared context every subsystem is constructed against.
///
/// The set of subsystems is fixed once [`EnvironmentBuilder::build`] returns;
/// individual subsystems are free to keep their own interior state.
pub struct Environment {
    subsystems: Vec<(SubsystemName, SubsystemHandle)>,
    loader: ModuleLoader,
    logs: LogHandle,
    reporter: FailureReporter,
    sink: Mutex<Option<FatalSink>>,
}

impl Environment {
    /// Start collecting subsystem factories around `logs`.
    pub fn builder(logs: LogHandle) -> EnvironmentBuilder {
        EnvironmentBuilder::new(logs)
    }

    fn handle(&self, name: SubsystemName) -> Option<&SubsystemHandle> {
        self.subsystems
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, handle)| handle)
    }

    /// Resolve a typed subsystem handle.
    pub fn get<T: Send + Sync + 'static>(&self, name: SubsystemName) -> Result<Arc<T>> {
        let handle = self
            .handle(name)
            .ok_or_else(|| DomoticError::SubsystemNotFound {
                name: name.to_string(),
            })?;
        handle
            .clone()
            .downcast::<T>()
            .map_err(|_| DomoticError::DowncastFailed {
                type_name: std::any::type_name::<T>().to_string(),
            })
    }

    /// Load a module by name through the environment's [`ModuleLoader`].
    pub fn require<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.loader.load(name)
    }

    /// Loader backing [`require`](Self::require).
    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    /// Log output shared with the exit path.
    pub fn logs(&self) -> &LogHandle {
        &self.logs
    }

    /// Report uncaught failures or request the process exit from any
    /// subsystem. Events are picked up once a supervisor has started.
    pub fn reporter(&self) -> &FailureReporter {
        &self.reporter
    }

    /// Take the receiving end of [`reporter`](Self::reporter); only the
    /// first caller gets it.
    pub(crate) fn claim_sink(&self) -> Option<FatalSink> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Whether a subsystem was constructed under `name`.
    pub fn contains(&self, name: SubsystemName) -> bool {
        self.handle(name).is_some()
    }

    /// Subsystem names in the order they were constructed.
    pub fn names(&self) -> impl Iterator<Item = SubsystemName> + '_ {
        self.subsystems.iter().map(|(name, _)| *name)
    }

    /// Number of constructed subsystems, the logger included.
    pub fn len(&self) -> usize {
        self.subsystems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subsystems.is_empty()
    }
}

/// Collects subsystem factories and runs them in dependency order.
///
/// Factories may be provided in any order; [`build`](Self::build) always runs
/// them in [`SubsystemName`] order, handing each one the environment built so
/// far. The logger is seeded from the [`LogHandle`] and cannot be provided.
///
/// # Example
/// ```
/// use domotic::environment::{Environment, SubsystemName};
/// use domotic::logging::LogHandle;
///
/// struct Devices;
/// struct Rules { devices: std::sync::Arc<Devices> }
///
/// let env = Environment::builder(LogHandle::direct())
///     .provide(SubsystemName::Rules, |env| {
///         Ok(Rules { devices: env.get::<Devices>(SubsystemName::Devices)? })
///     })
///     .provide(SubsystemName::Devices, |_| Ok(Devices))
///     .build()
///     .unwrap();
/// assert!(env.contains(SubsystemName::Rules));
/// ```
pub struct EnvironmentBuilder {
    logs: LogHandle,
    loader: ModuleLoader,
    factories: BTreeMap<SubsystemName, SubsystemFactory>,
    duplicate: Option<SubsystemName>,
}

impl EnvironmentBuilder {
    /// Builder with only the logger seeded.
    pub fn new(logs: LogHandle) -> Self {
        Self {
            logs,
            loader: ModuleLoader::new(),
            factories: BTreeMap::new(),
            duplicate: None,
        }
    }

    /// Provide the factory for a subsystem.
    pub fn provide<T, F>(mut self, name: SubsystemName, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: FnOnce(&Environment) -> anyhow::Result<T> + 'static,
    {
        if name == SubsystemName::Logger || self.factories.contains_key(&name) {
            self.duplicate.get_or_insert(name);
            return self;
        }
        let factory: SubsystemFactory =
            Box::new(move |env| factory(env).map(|handle| Arc::new(handle) as SubsystemHandle));
        self.factories.insert(name, factory);
        self
    }

    /// Use a pre-populated module loader instead of an empty one.
    pub fn loader(mut self, loader: ModuleLoader) -> Self {
        self.loader = loader;
        self
    }

    /// Construct every provided subsystem.
    ///
    /// # Errors
    /// Fails on a duplicate registration or the first factory error. The
    /// partially built environment is dropped in that case.
    pub fn build(mut self) -> Result<Environment> {
        if let Some(name) = self.duplicate {
            return Err(DomoticError::DuplicateSubsystem {
                name: name.to_string(),
            });
        }

        let (reporter, sink) = FatalSink::channel();
        let mut env = Environment {
            subsystems: Vec::with_capacity(self.factories.len() + 1),
            loader: self.loader,
            logs: self.logs.clone(),
            reporter,
            sink: Mutex::new(Some(sink)),
        };
        env.subsystems
            .push((SubsystemName::Logger, Arc::new(self.logs) as SubsystemHandle));

        for name in SubsystemName::iter() {
            let Some(factory) = self.factories.remove(&name) else {
                continue;
            };
            tracing::debug!(subsystem = %name, "constructing subsystem");
            let handle = factory(&env).map_err(|e| {
                tracing::error!("Failed to construct subsystem {}: {:#}", name, e);
                DomoticError::construction(name.to_string(), format!("{e:#}"))
            })?;
            env.subsystems.push((name, handle));
        }

        tracing::info!(subsystems = env.len(), "environment ready");
        Ok(env)
    }
}
