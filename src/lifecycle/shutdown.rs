//! Graceful shutdown and process exit
//!
//! Every supervised shutdown ends in process exit: the framework is destroyed
//! (at most once), buffered log output is flushed, and the process terminates.

use super::{Failure, Framework, LifecycleState, StateCell};
use crate::logging::LogHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Exit code for every exit the supervisor requests.
pub const EXIT_FAILURE: i32 = 1;

/// Ends the process.
pub trait Terminator: Send + Sync + 'static {
    fn terminate(&self, code: i32);
}

/// Calls [`std::process::exit`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessTerminator;

impl Terminator for ProcessTerminator {
    fn terminate(&self, code: i32) {
        std::process::exit(code);
    }
}

/// The single exit the supervisor honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitRequest {
    pub code: i32,
    /// State the supervisor was in when the exit was requested.
    pub origin: LifecycleState,
}

/// Destroys the framework and exits the process, once.
pub struct ShutdownCoordinator {
    state: Arc<StateCell>,
    logs: LogHandle,
    terminator: Arc<dyn Terminator>,
    destroy_timeout: Option<Duration>,
    exit_tx: watch::Sender<Option<ExitRequest>>,
}

impl ShutdownCoordinator {
    /// Coordinator driving `state`, flushing `logs` and ending through `terminator`.
    pub fn new(state: Arc<StateCell>, logs: LogHandle, terminator: Arc<dyn Terminator>) -> Self {
        let (exit_tx, _) = watch::channel(None);
        Self {
            state,
            logs,
            terminator,
            destroy_timeout: None,
            exit_tx,
        }
    }

    /// Treat a destroy that has not settled after `timeout` as failed.
    pub fn with_destroy_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.destroy_timeout = timeout;
        self
    }

    /// Destroy the framework, then exit with `code` whether or not destroy
    /// succeeded.
    ///
    /// Only the first call made while the supervisor is ready does anything;
    /// later calls return `false` immediately.
    pub async fn shutdown(&self, framework: &dyn Framework, code: i32) -> bool {
        if !self
            .state
            .transition(LifecycleState::Ready, LifecycleState::ShuttingDown)
        {
            tracing::debug!(state = %self.state.get(), "shutdown already in progress");
            return false;
        }

        tracing::info!("Destroying framework...");
        if let Err(failure) = self.destroy(framework).await {
            if !failure.is_silent() {
                tracing::error!("Error during framework destroy: {}", failure.detailed());
            }
        }

        self.exit(code).await
    }

    async fn destroy(&self, framework: &dyn Framework) -> Result<(), Failure> {
        match self.destroy_timeout {
            Some(timeout) => tokio::time::timeout(timeout, framework.destroy())
                .await
                .unwrap_or_else(|_| {
                    Err(Failure::new(format!(
                        "framework destroy timed out after {:?}",
                        timeout
                    )))
                }),
            None => framework.destroy().await,
        }
    }

    /// Exit the process with `code`, flushing buffered log output first.
    ///
    /// Only the first request is honored; returns `false` for the rest.
    pub async fn exit(&self, code: i32) -> bool {
        let Some(origin) = self.state.exit() else {
            tracing::debug!(code, "exit already requested");
            return false;
        };

        tracing::info!("exiting...");
        if self.logs.is_buffered() {
            self.logs.finish().await;
        }

        self.exit_tx.send_replace(Some(ExitRequest { code, origin }));
        self.terminator.terminate(code);
        true
    }

    /// The honored exit request, if any.
    pub fn exit_request(&self) -> Option<ExitRequest> {
        *self.exit_tx.borrow()
    }

    /// Wait until an exit has been requested.
    pub async fn wait_for_exit(&self) -> Option<ExitRequest> {
        let mut rx = self.exit_tx.subscribe();
        let request = rx.wait_for(Option::is_some).await.ok().and_then(|r| *r);
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockFramework, RecordingTerminator};

    fn ready_coordinator() -> (ShutdownCoordinator, Arc<StateCell>, Arc<RecordingTerminator>) {
        let state = Arc::new(StateCell::new());
        state.transition(LifecycleState::Uninitialized, LifecycleState::Initializing);
        state.transition(LifecycleState::Initializing, LifecycleState::Ready);
        let terminator = Arc::new(RecordingTerminator::default());
        let coordinator =
            ShutdownCoordinator::new(Arc::clone(&state), LogHandle::direct(), terminator.clone());
        (coordinator, state, terminator)
    }

    #[tokio::test]
    async fn test_shutdown_destroys_then_exits() {
        let (coordinator, state, terminator) = ready_coordinator();
        let framework = MockFramework::new();

        assert!(coordinator.shutdown(&framework, EXIT_FAILURE).await);
        assert_eq!(framework.destroy_calls(), 1);
        assert_eq!(terminator.codes(), vec![1]);
        assert_eq!(state.get(), LifecycleState::Exited);
        assert_eq!(
            coordinator.exit_request(),
            Some(ExitRequest {
                code: 1,
                origin: LifecycleState::ShuttingDown,
            })
        );
    }

    #[tokio::test]
    async fn test_failed_destroy_still_exits() {
        let (coordinator, _, terminator) = ready_coordinator();
        let framework = MockFramework::new().failing_destroy("socket already closed");

        assert!(coordinator.shutdown(&framework, EXIT_FAILURE).await);
        assert_eq!(framework.destroy_calls(), 1);
        assert_eq!(terminator.codes(), vec![1]);
    }

    #[tokio::test]
    async fn test_second_shutdown_is_ignored() {
        let (coordinator, _, terminator) = ready_coordinator();
        let framework = MockFramework::new();

        let (first, second) = tokio::join!(
            coordinator.shutdown(&framework, EXIT_FAILURE),
            coordinator.shutdown(&framework, EXIT_FAILURE),
        );
        assert!(first ^ second);
        assert_eq!(framework.destroy_calls(), 1);
        assert_eq!(terminator.codes(), vec![1]);
    }

    #[tokio::test]
    async fn test_shutdown_before_ready_does_nothing() {
        let state = Arc::new(StateCell::new());
        let terminator = Arc::new(RecordingTerminator::default());
        let coordinator =
            ShutdownCoordinator::new(Arc::clone(&state), LogHandle::direct(), terminator.clone());
        let framework = MockFramework::new();

        assert!(!coordinator.shutdown(&framework, EXIT_FAILURE).await);
        assert_eq!(framework.destroy_calls(), 0);
        assert!(terminator.codes().is_empty());
    }

    #[tokio::test]
    async fn test_exit_is_honored_once() {
        let state = Arc::new(StateCell::new());
        state.transition(LifecycleState::Uninitialized, LifecycleState::Initializing);
        let terminator = Arc::new(RecordingTerminator::default());
        let coordinator =
            ShutdownCoordinator::new(Arc::clone(&state), LogHandle::direct(), terminator.clone());

        assert!(coordinator.exit(EXIT_FAILURE).await);
        assert!(!coordinator.exit(EXIT_FAILURE).await);
        assert_eq!(terminator.codes(), vec![1]);
        assert_eq!(
            coordinator.wait_for_exit().await.map(|r| r.origin),
            Some(LifecycleState::Initializing)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_timeout() {
        let (coordinator, _, terminator) = ready_coordinator();
        let coordinator = coordinator.with_destroy_timeout(Some(Duration::from_secs(5)));
        let framework = MockFramework::new().hanging_destroy();

        assert!(coordinator.shutdown(&framework, EXIT_FAILURE).await);
        assert_eq!(terminator.codes(), vec![1]);
    }
}
