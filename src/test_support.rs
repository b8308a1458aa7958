//! Shared fakes for the unit tests.

use crate::lifecycle::{Failure, Framework, Terminator};
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing_subscriber::fmt::MakeWriter;

/// Serializes tests that install the process-wide panic hook.
pub static PANIC_HOOK_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

#[derive(Default)]
pub struct RecordingTerminator {
    codes: Mutex<Vec<i32>>,
}

impl RecordingTerminator {
    pub fn codes(&self) -> Vec<i32> {
        self.codes.lock().unwrap().clone()
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, code: i32) {
        self.codes.lock().unwrap().push(code);
    }
}

#[derive(Clone, Copy)]
enum Outcome {
    Succeed,
    Fail(&'static str, bool),
    Hang,
}

impl Outcome {
    async fn settle(self) -> Result<(), Failure> {
        match self {
            Outcome::Succeed => Ok(()),
            Outcome::Fail(message, silent) => {
                let failure = Failure::new(message);
                Err(if silent { failure.silent() } else { failure })
            }
            Outcome::Hang => std::future::pending().await,
        }
    }
}

/// Framework whose init and destroy outcomes are scripted.
pub struct MockFramework {
    init: Outcome,
    destroy: Outcome,
    init_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
    release_init: Option<Arc<Notify>>,
}

impl MockFramework {
    pub fn new() -> Self {
        Self {
            init: Outcome::Succeed,
            destroy: Outcome::Succeed,
            init_calls: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
            release_init: None,
        }
    }

    pub fn failing_init(mut self, message: &'static str) -> Self {
        self.init = Outcome::Fail(message, false);
        self
    }

    pub fn silently_failing_init(mut self, message: &'static str) -> Self {
        self.init = Outcome::Fail(message, true);
        self
    }

    pub fn failing_destroy(mut self, message: &'static str) -> Self {
        self.destroy = Outcome::Fail(message, false);
        self
    }

    pub fn hanging_init(mut self) -> Self {
        self.init = Outcome::Hang;
        self
    }

    pub fn hanging_destroy(mut self) -> Self {
        self.destroy = Outcome::Hang;
        self
    }

    /// Hold init until the returned gate is notified.
    pub fn gated_init(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.release_init = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Framework for MockFramework {
    async fn init(&self) -> Result<(), Failure> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.release_init {
            gate.notified().await;
        }
        self.init.settle().await
    }

    async fn destroy(&self) -> Result<(), Failure> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.destroy.settle().await
    }
}

/// Captures formatted log output of the thread-local default subscriber.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Install as the default subscriber for the current thread.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(self.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn lines_containing(&self, needle: &str) -> usize {
        self.contents()
            .lines()
            .filter(|line| line.contains(needle))
            .count()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Poll `condition` until it holds, giving spawned tasks time to run.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
