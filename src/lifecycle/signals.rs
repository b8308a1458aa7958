//! Termination signal sources
//!
//! Signal handlers are only registered when the supervisor arms them after a
//! successful initialization. Until then a signal keeps whatever default
//! disposition the process has.

use async_trait::async_trait;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use strum_macros::Display;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Signal {
    #[strum(serialize = "SIGINT")]
    Interrupt,
    #[strum(serialize = "SIGTERM")]
    Terminate,
}

/// A stream of termination signals.
#[async_trait]
pub trait SignalSource: Send {
    /// Wait for the next signal; `None` once the source is closed.
    async fn recv(&mut self) -> Option<Signal>;
}

/// Registers handlers and hands back the resulting [`SignalSource`].
pub trait SignalListener: Send + Sync + 'static {
    fn listen(&self) -> io::Result<Box<dyn SignalSource>>;
}

/// SIGINT and SIGTERM from the operating system (ctrl-c on non-unix).
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSignals;

impl SignalListener for OsSignals {
    fn listen(&self) -> io::Result<Box<dyn SignalSource>> {
        Ok(Box::new(OsSignalStream::new()?))
    }
}

pub struct OsSignalStream {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl OsSignalStream {
    #[cfg(unix)]
    fn new() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    fn new() -> io::Result<Self> {
        Ok(Self {})
    }
}

#[async_trait]
impl SignalSource for OsSignalStream {
    #[cfg(unix)]
    async fn recv(&mut self) -> Option<Signal> {
        tokio::select! {
            received = self.interrupt.recv() => received.map(|_| Signal::Interrupt),
            received = self.terminate.recv() => received.map(|_| Signal::Terminate),
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> Option<Signal> {
        tokio::signal::ctrl_c().await.ok().map(|_| Signal::Interrupt)
    }
}

/// Raises signals programmatically.
///
/// Signals raised before anything listens are dropped, the same way an
/// unregistered OS signal never reaches the supervisor.
#[derive(Clone, Default)]
pub struct SignalTrigger {
    armed: Arc<Mutex<Option<mpsc::UnboundedSender<Signal>>>>,
}

impl SignalTrigger {
    /// Trigger that nothing listens to yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a signal. Returns `false` if nothing is listening.
    pub fn raise(&self, signal: Signal) -> bool {
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| tx.send(signal).is_ok())
    }

    /// Whether a listener is currently attached.
    pub fn is_armed(&self) -> bool {
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

impl SignalListener for SignalTrigger {
    fn listen(&self) -> io::Result<Box<dyn SignalSource>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.armed.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        Ok(Box::new(TriggeredSignals { rx }))
    }
}

struct TriggeredSignals {
    rx: mpsc::UnboundedReceiver<Signal>,
}

#[async_trait]
impl SignalSource for TriggeredSignals {
    async fn recv(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_is_inert_until_listened() {
        let trigger = SignalTrigger::new();
        assert!(!trigger.is_armed());
        assert!(!trigger.raise(Signal::Terminate));

        let mut source = trigger.listen().unwrap();
        assert!(trigger.is_armed());
        assert!(trigger.raise(Signal::Interrupt));
        assert!(trigger.raise(Signal::Terminate));
        assert_eq!(source.recv().await, Some(Signal::Interrupt));
        assert_eq!(source.recv().await, Some(Signal::Terminate));
    }

    #[tokio::test]
    async fn test_dropped_source_disarms() {
        let trigger = SignalTrigger::new();
        drop(trigger.listen().unwrap());
        assert!(!trigger.is_armed());
        assert!(!trigger.raise(Signal::Interrupt));
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(Signal::Interrupt.to_string(), "SIGINT");
        assert_eq!(Signal::Terminate.to_string(), "SIGTERM");
    }
}
