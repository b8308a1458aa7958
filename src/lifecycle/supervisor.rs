//! Lifecycle supervisor
//!
//! Drives the framework from construction to a ready state, arms the
//! termination signal handlers once it gets there, and routes every uncaught
//! failure through [`FailurePolicy`].

use super::shutdown::{EXIT_FAILURE, ExitRequest, ShutdownCoordinator, Terminator};
use super::signals::{OsSignals, SignalListener};
use super::{Failure, Framework, LifecycleState, ProcessTerminator, StateCell, Terminated};
use crate::config::{ConfigSource, SupervisorConfig};
use crate::environment::Environment;
use crate::interceptor::{
    Fatal, FailurePolicy, FailureReporter, FatalSink, clear_panic_reporter, install_panic_hook,
    log_uncaught,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

struct Core {
    environment: Arc<Environment>,
    config: SupervisorConfig,
    state: Arc<StateCell>,
    coordinator: ShutdownCoordinator,
    framework: OnceLock<Arc<dyn Framework>>,
    signals: Box<dyn SignalListener>,
    signals_armed: AtomicBool,
    init_timeout: Option<Duration>,
    catch_panics: bool,
    reporter: FailureReporter,
}

impl Core {
    async fn init(&self, framework: &dyn Framework) -> Result<(), Failure> {
        match self.init_timeout {
            Some(timeout) => tokio::time::timeout(timeout, framework.init())
                .await
                .unwrap_or_else(|_| {
                    Err(Failure::new(format!(
                        "framework init timed out after {:?}",
                        timeout
                    )))
                }),
            None => framework.init().await,
        }
    }

    async fn shutdown(&self) -> bool {
        let Some(framework) = self.framework.get() else {
            tracing::debug!(state = %self.state.get(), "no framework to shut down");
            return false;
        };
        self.coordinator
            .shutdown(framework.as_ref(), EXIT_FAILURE)
            .await
    }

    async fn handle_uncaught(self: Arc<Self>, failure: Failure) {
        log_uncaught(&failure);

        let state = self.state.get();
        match FailurePolicy::decide(state, self.config.daemonized) {
            FailurePolicy::ExitImmediately => {
                self.coordinator.exit(EXIT_FAILURE).await;
            }
            FailurePolicy::KeepAlive => {
                tracing::warn!(
                    "Keeping the framework alive, but it could be in an undefined state, please restart it as soon as possible!"
                );
            }
            FailurePolicy::Shutdown => {
                tracing::warn!("Shutting the framework down...");
                self.shutdown().await;
            }
            FailurePolicy::Ignore => {
                tracing::debug!(%state, "exit already in progress, ignoring uncaught failure");
            }
        }
    }

    async fn handle_exit(self: Arc<Self>, code: i32) {
        let state = self.state.get();
        tracing::info!(code, %state, "exit requested");
        match state {
            LifecycleState::Uninitialized | LifecycleState::Initializing => {
                self.coordinator.exit(code).await;
            }
            LifecycleState::Ready => {
                if let Some(framework) = self.framework.get() {
                    self.coordinator.shutdown(framework.as_ref(), code).await;
                }
            }
            LifecycleState::ShuttingDown | LifecycleState::Exited => {}
        }
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        if self.catch_panics {
            clear_panic_reporter(&self.reporter);
        }
    }
}

async fn drain_sink(core: Weak<Core>, mut sink: FatalSink) {
    while let Some(event) = sink.next().await {
        let Some(core) = core.upgrade() else {
            break;
        };
        match event {
            Fatal::Uncaught(failure) => tokio::spawn(core.handle_uncaught(failure)),
            Fatal::Exit(code) => tokio::spawn(core.handle_exit(code)),
        };
    }
}

/// Owns the lifecycle of one framework instance in this process.
///
/// # Example
///
/// ```rust,ignore
/// use domotic::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = SupervisorConfig::from_env()?;
///     let logs = init_logging(&config.logging)?;
///     let env = Arc::new(Environment::builder(logs).build()?);
///
///     let supervisor = Supervisor::builder(env, config).build();
///     let Ok(hub) = supervisor.start(|source, env| Hub::new(source.path(), env)).await else {
///         return Ok(());
///     };
///     api::serve(hub).await;
///     supervisor.wait_for_exit().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Supervisor {
    core: Arc<Core>,
}

impl Supervisor {
    /// Start configuring a supervisor for `environment`.
    pub fn builder(environment: Arc<Environment>, config: SupervisorConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(environment, config)
    }

    /// Construct and initialize the framework.
    ///
    /// On success the supervisor is ready, termination signals are handled
    /// and the framework is returned for other collaborators to use. Any
    /// failure on the way is logged (unless silent) and ends the process
    /// with exit code 1 without destroying the framework; the `Err` only
    /// comes back when the terminator does not actually end the process.
    pub async fn start<F, E, C>(&self, construct: C) -> Result<Arc<F>, Terminated>
    where
        F: Framework + 'static,
        E: Into<Failure>,
        C: FnOnce(&ConfigSource, &Arc<Environment>) -> Result<F, E>,
    {
        let core = &self.core;
        if !core
            .state
            .transition(LifecycleState::Uninitialized, LifecycleState::Initializing)
        {
            let state = core.state.get();
            tracing::error!(%state, "supervisor was already started");
            return Err(Terminated { state });
        }
        self.intercept();

        let source = &core.config.config_source;
        tracing::info!(
            config = %source,
            overridden = source.is_override(),
            "Starting framework..."
        );
        let framework = match construct(source, &core.environment) {
            Ok(framework) => Arc::new(framework),
            Err(e) => return Err(self.abort_startup(e.into()).await),
        };

        if let Err(failure) = core.init(framework.as_ref()).await {
            return Err(self.abort_startup(failure).await);
        }

        let _ = core.framework.set(framework.clone());
        if !core
            .state
            .transition(LifecycleState::Initializing, LifecycleState::Ready)
        {
            // An uncaught failure already requested the exit.
            return Err(Terminated {
                state: core.state.get(),
            });
        }
        tracing::info!("Framework ready");

        self.arm_signals();
        Ok(framework)
    }

    fn intercept(&self) {
        match self.core.environment.claim_sink() {
            Some(sink) => {
                tokio::spawn(drain_sink(Arc::downgrade(&self.core), sink));
            }
            None => tracing::warn!("fatal-failure sink already claimed by another supervisor"),
        }
        if self.core.catch_panics {
            install_panic_hook(self.core.reporter.clone());
        }
    }

    async fn abort_startup(&self, failure: Failure) -> Terminated {
        if !failure.is_silent() {
            tracing::error!("Startup error: {}", failure.detailed());
        }
        self.core.coordinator.exit(EXIT_FAILURE).await;
        Terminated {
            state: self.core.state.get(),
        }
    }

    fn arm_signals(&self) {
        if self.core.signals_armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut source = match self.core.signals.listen() {
            Ok(source) => source,
            Err(e) => {
                tracing::error!("Failed to install termination signal handlers: {}", e);
                return;
            }
        };

        let core = Arc::downgrade(&self.core);
        tokio::spawn(async move {
            while let Some(signal) = source.recv().await {
                let Some(core) = core.upgrade() else {
                    break;
                };
                tracing::info!(%signal, "Received termination signal");
                tokio::spawn(async move {
                    core.shutdown().await;
                });
            }
        });
    }

    /// Destroy the framework and exit, exactly as a termination signal would.
    pub async fn shutdown(&self) -> bool {
        self.core.shutdown().await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.core.state.get()
    }

    /// Wait until the supervisor reaches `state`, or has exited.
    pub async fn wait_for_state(&self, state: LifecycleState) -> LifecycleState {
        self.core
            .state
            .wait_for(|current| *current == state || current.is_terminal())
            .await
    }

    /// Wait until the process exit has been requested.
    pub async fn wait_for_exit(&self) -> Option<ExitRequest> {
        self.core.coordinator.wait_for_exit().await
    }

    /// The honored exit request, if any.
    pub fn exit_request(&self) -> Option<ExitRequest> {
        self.core.coordinator.exit_request()
    }

    /// Reporter feeding this supervisor's fatal-failure sink, the same one
    /// [`Environment::reporter`] hands to subsystems.
    pub fn reporter(&self) -> FailureReporter {
        self.core.reporter.clone()
    }

    /// The environment the framework is constructed against.
    pub fn environment(&self) -> &Arc<Environment> {
        &self.core.environment
    }

    /// Where the framework reads its configuration from.
    pub fn config_source(&self) -> &ConfigSource {
        &self.core.config.config_source
    }

    /// The framework, once initialization has succeeded.
    pub fn framework(&self) -> Option<Arc<dyn Framework>> {
        self.core.framework.get().cloned()
    }
}

/// Builder for [`Supervisor`]
pub struct SupervisorBuilder {
    environment: Arc<Environment>,
    config: SupervisorConfig,
    terminator: Arc<dyn Terminator>,
    signals: Box<dyn SignalListener>,
    init_timeout: Option<Duration>,
    destroy_timeout: Option<Duration>,
    catch_panics: bool,
}

impl SupervisorBuilder {
    /// Defaults: real process exit, OS signals, no timeouts, panics caught.
    pub fn new(environment: Arc<Environment>, config: SupervisorConfig) -> Self {
        Self {
            environment,
            config,
            terminator: Arc::new(ProcessTerminator),
            signals: Box::new(OsSignals),
            init_timeout: None,
            destroy_timeout: None,
            catch_panics: true,
        }
    }

    /// Replace [`ProcessTerminator`].
    pub fn terminator<T: Terminator>(mut self, terminator: Arc<T>) -> Self {
        self.terminator = terminator;
        self
    }

    /// Replace the OS signal handlers.
    pub fn signals(mut self, signals: impl SignalListener) -> Self {
        self.signals = Box::new(signals);
        self
    }

    /// Treat an init that has not settled after `timeout` as failed.
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = Some(timeout);
        self
    }

    /// Treat a destroy that has not settled after `timeout` as failed.
    pub fn destroy_timeout(mut self, timeout: Duration) -> Self {
        self.destroy_timeout = Some(timeout);
        self
    }

    /// Whether panics are routed to the fatal-failure sink (default `true`).
    pub fn catch_panics(mut self, enabled: bool) -> Self {
        self.catch_panics = enabled;
        self
    }

    /// Finish the supervisor. Nothing runs until [`Supervisor::start`].
    pub fn build(self) -> Supervisor {
        let state = Arc::new(StateCell::new());
        let coordinator = ShutdownCoordinator::new(
            Arc::clone(&state),
            self.environment.logs().clone(),
            self.terminator,
        )
        .with_destroy_timeout(self.destroy_timeout);
        let reporter = self.environment.reporter().clone();

        Supervisor {
            core: Arc::new(Core {
                environment: self.environment,
                config: self.config,
                state,
                coordinator,
                framework: OnceLock::new(),
                signals: self.signals,
                signals_armed: AtomicBool::new(false),
                init_timeout: self.init_timeout,
                catch_panics: self.catch_panics,
                reporter,
            }),
        }
    }
}
