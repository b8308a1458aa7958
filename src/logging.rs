//! Tracing setup with an optionally buffered output stream.
//!
//! When buffering is enabled, log lines are handed to a
//! [`tracing_appender::non_blocking`] worker. Buffered lines are lost if the
//! process exits while the worker still holds them, so the exit path calls
//! [`LogHandle::finish`] first. That switches output back to direct stdout
//! writes and waits until the worker has flushed.

use crate::error::{DomoticError, Result};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_FILE_NAME: &str = "domotic.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `domotic=debug`.
    pub filter: String,
    /// Route output through a non-blocking worker.
    pub buffered: bool,
    /// Write buffered output to a daily rolling file here instead of stdout.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            buffered: false,
            directory: None,
        }
    }
}

/// Writer factory that can be switched between a buffered stream and direct
/// stdout at runtime.
#[derive(Clone, Default)]
pub struct LogOutput {
    buffered: Arc<RwLock<Option<NonBlocking>>>,
}

impl LogOutput {
    /// Send subsequent log lines through `writer`.
    pub fn redirect(&self, writer: NonBlocking) {
        *self.buffered.write().unwrap_or_else(PoisonError::into_inner) = Some(writer);
    }

    /// Go back to direct writes. Returns whether output was redirected.
    pub fn restore(&self) -> bool {
        self.buffered
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    /// Whether output currently goes through a buffered writer.
    pub fn is_redirected(&self) -> bool {
        self.buffered
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

pub enum LogWriter {
    Buffered(NonBlocking),
    Direct(io::Stdout),
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LogWriter::Buffered(writer) => writer.write(buf),
            LogWriter::Direct(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogWriter::Buffered(writer) => writer.flush(),
            LogWriter::Direct(writer) => writer.flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for LogOutput {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        let buffered = self
            .buffered
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match buffered {
            Some(writer) => LogWriter::Buffered(writer),
            None => LogWriter::Direct(io::stdout()),
        }
    }
}

struct LogState {
    output: LogOutput,
    guard: Mutex<Option<WorkerGuard>>,
}

/// Handle to the process log output, registered as the logger subsystem.
#[derive(Clone)]
pub struct LogHandle {
    state: Arc<LogState>,
}

impl LogHandle {
    /// Handle for output that is written directly and needs no flushing.
    pub fn direct() -> Self {
        Self::new(LogOutput::default(), None)
    }

    /// Handle over `output`; `guard` keeps the buffered worker alive.
    pub fn new(output: LogOutput, guard: Option<WorkerGuard>) -> Self {
        Self {
            state: Arc::new(LogState {
                output,
                guard: Mutex::new(guard),
            }),
        }
    }

    /// The switchable writer behind the subscriber.
    pub fn output(&self) -> &LogOutput {
        &self.state.output
    }

    /// Whether a buffered stream still has to be finished.
    pub fn is_buffered(&self) -> bool {
        self.state
            .guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Restore direct output, then wait for the buffered stream to flush.
    ///
    /// Returns `false` when there was no buffered stream to finish.
    pub async fn finish(&self) -> bool {
        let guard = self
            .state
            .guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(guard) = guard else {
            return false;
        };

        self.state.output.restore();
        // Dropping the guard blocks until the worker has drained its queue.
        if let Err(e) = tokio::task::spawn_blocking(move || drop(guard)).await {
            tracing::error!("Failed to flush buffered log output: {}", e);
        }
        true
    }
}

/// Install the global tracing subscriber.
pub fn init_logging(config: &LoggingConfig) -> Result<LogHandle> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|e| DomoticError::Logging {
        message: format!("invalid filter {:?}: {}", config.filter, e),
    })?;

    let output = LogOutput::default();
    let guard = if config.buffered {
        let (writer, guard) = match &config.directory {
            Some(directory) => {
                std::fs::create_dir_all(directory)?;
                let appender = tracing_appender::rolling::daily(directory, LOG_FILE_NAME);
                tracing_appender::non_blocking(appender)
            }
            None => tracing_appender::non_blocking(io::stdout()),
        };
        output.redirect(writer);
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(output.clone()))
        .try_init()
        .map_err(|e| DomoticError::Logging {
            message: e.to_string(),
        })?;

    tracing::debug!(buffered = config.buffered, "logging initialised");
    Ok(LogHandle::new(output, guard))
}
