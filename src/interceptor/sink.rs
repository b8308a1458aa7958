use crate::lifecycle::{Failure, LifecycleState};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What to do about an uncaught failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// The framework never became ready: exit without destroying it.
    ExitImmediately,
    /// Ready in daemonized mode: warn and keep running.
    KeepAlive,
    /// Ready: destroy the framework, then exit.
    Shutdown,
    /// An exit is already under way.
    Ignore,
}

impl FailurePolicy {
    /// Policy for a failure raised while the supervisor is in `state`.
    pub fn decide(state: LifecycleState, daemonized: bool) -> Self {
        match state {
            LifecycleState::Uninitialized | LifecycleState::Initializing => {
                FailurePolicy::ExitImmediately
            }
            LifecycleState::Ready if daemonized => FailurePolicy::KeepAlive,
            LifecycleState::Ready => FailurePolicy::Shutdown,
            LifecycleState::ShuttingDown | LifecycleState::Exited => FailurePolicy::Ignore,
        }
    }
}

/// Log an uncaught failure unless it is marked silent.
pub fn log_uncaught(failure: &Failure) {
    if failure.is_silent() {
        return;
    }
    tracing::error!(
        "An uncaught failure occurred: {}\nThis is most probably a bug in the framework or in a plugin, please report it!",
        failure.detailed()
    );
}

/// What reaches the supervisor through the sink.
#[derive(Debug)]
pub enum Fatal {
    /// A failure nobody handled.
    Uncaught(Failure),
    /// An explicit request to end the process with this code.
    Exit(i32),
}

/// Cloneable handle for reporting failures nobody else will handle.
///
/// Every [`Environment`](crate::environment::Environment) owns one, so any
/// subsystem holding the environment can reach the supervisor.
#[derive(Clone, Debug)]
pub struct FailureReporter {
    tx: mpsc::UnboundedSender<Fatal>,
}

impl FailureReporter {
    /// Hand a failure to the sink. Returns `false` once the sink is gone.
    pub fn report(&self, failure: impl Into<Failure>) -> bool {
        self.tx.send(Fatal::Uncaught(failure.into())).is_ok()
    }

    /// Ask the supervisor to end the process with `code`.
    ///
    /// A ready framework is destroyed first; before that point the process
    /// exits right away.
    pub fn exit(&self, code: i32) -> bool {
        self.tx.send(Fatal::Exit(code)).is_ok()
    }

    /// Spawn a task whose error, if any, is reported as uncaught.
    pub fn spawn<F, E>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<Failure> + Send + 'static,
    {
        let reporter = self.clone();
        tokio::spawn(async move {
            if let Err(e) = future.await {
                reporter.report(e);
            }
        })
    }

    /// Whether both reporters feed the same sink.
    pub fn same_sink(&self, other: &FailureReporter) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Receiving end for uncaught failures; there is one per environment.
pub struct FatalSink {
    rx: mpsc::UnboundedReceiver<Fatal>,
}

impl FatalSink {
    /// Create a sink together with the first reporter feeding it.
    pub fn channel() -> (FailureReporter, FatalSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        (FailureReporter { tx }, FatalSink { rx })
    }

    /// Next reported event; `None` once every reporter is dropped.
    pub async fn next(&mut self) -> Option<Fatal> {
        self.rx.recv().await
    }
}

static PANIC_HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);
static PANIC_REPORTER: RwLock<Option<FailureReporter>> = RwLock::new(None);

/// Route panics to `reporter`.
///
/// The hook itself is installed once per process; later calls only swap the
/// reporter. Panics raised while no reporter is set go to the previous hook.
pub fn install_panic_hook(reporter: FailureReporter) {
    *PANIC_REPORTER.write().unwrap_or_else(PoisonError::into_inner) = Some(reporter);

    if PANIC_HOOK_INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let reporter = PANIC_REPORTER
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match reporter {
            Some(reporter) if reporter.report(Failure::from_panic(info)) => {}
            _ => previous(info),
        }
    }));
}

/// Stop routing panics to `reporter`'s sink.
///
/// Does nothing when another sink has taken over the hook since.
pub fn clear_panic_reporter(reporter: &FailureReporter) {
    let mut installed = PANIC_REPORTER.write().unwrap_or_else(PoisonError::into_inner);
    if installed
        .as_ref()
        .is_some_and(|current| current.same_sink(reporter))
    {
        installed.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CapturedLogs, PANIC_HOOK_LOCK};
    use LifecycleState::*;

    fn uncaught(event: Option<Fatal>) -> Failure {
        match event {
            Some(Fatal::Uncaught(failure)) => failure,
            other => panic!("expected an uncaught failure, got {:?}", other),
        }
    }

    #[test]
    fn test_policy_table() {
        for daemonized in [false, true] {
            assert_eq!(
                FailurePolicy::decide(Uninitialized, daemonized),
                FailurePolicy::ExitImmediately
            );
            assert_eq!(
                FailurePolicy::decide(Initializing, daemonized),
                FailurePolicy::ExitImmediately
            );
            assert_eq!(FailurePolicy::decide(ShuttingDown, daemonized), FailurePolicy::Ignore);
            assert_eq!(FailurePolicy::decide(Exited, daemonized), FailurePolicy::Ignore);
        }
        assert_eq!(FailurePolicy::decide(Ready, true), FailurePolicy::KeepAlive);
        assert_eq!(FailurePolicy::decide(Ready, false), FailurePolicy::Shutdown);
    }

    #[test]
    fn test_silent_failure_is_not_logged() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();

        log_uncaught(&Failure::new("already handled").silent());
        assert!(logs.contents().is_empty());

        log_uncaught(&Failure::new("rule engine stalled"));
        assert_eq!(logs.lines_containing("An uncaught failure occurred: rule engine stalled"), 1);
        assert!(logs.contents().contains("please report it"));
    }

    #[tokio::test]
    async fn test_spawned_errors_reach_the_sink() {
        let (reporter, mut sink) = FatalSink::channel();
        reporter
            .spawn(async { Err::<(), _>(Failure::new("poller crashed")) })
            .await
            .unwrap();
        reporter.spawn(async { Ok::<(), Failure>(()) }).await.unwrap();
        drop(reporter);

        assert_eq!(uncaught(sink.next().await).message(), "poller crashed");
        assert!(sink.next().await.is_none());
    }

    #[tokio::test]
    async fn test_exit_request_reaches_the_sink() {
        let (reporter, mut sink) = FatalSink::channel();
        assert!(reporter.exit(3));
        assert!(matches!(sink.next().await, Some(Fatal::Exit(3))));
    }

    #[tokio::test]
    async fn test_panics_are_routed_until_cleared() {
        let _serial = PANIC_HOOK_LOCK.lock().await;
        let (reporter, mut sink) = FatalSink::channel();
        let (other, _other_sink) = FatalSink::channel();
        assert!(!reporter.same_sink(&other));
        install_panic_hook(reporter.clone());

        let _ = std::panic::catch_unwind(|| panic!("relay stuck closed"));
        let failure = uncaught(sink.next().await);
        assert!(failure.message().contains("relay stuck closed"));

        // Clearing on behalf of another sink leaves the hook in place.
        clear_panic_reporter(&other);
        let _ = std::panic::catch_unwind(|| panic!("dimmer overheated"));
        assert!(uncaught(sink.next().await).message().contains("dimmer overheated"));

        clear_panic_reporter(&reporter);
        let _ = std::panic::catch_unwind(|| panic!("nobody is listening"));
        drop(reporter);
        assert!(sink.next().await.is_none());
    }

    #[test]
    fn test_report_after_sink_dropped() {
        let (reporter, sink) = FatalSink::channel();
        drop(sink);
        assert!(!reporter.report("nobody listening"));
    }
}
