//! Connection-origin traces.

use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Call stack captured at the moment an outbound connection was initiated.
///
/// Capturing is unconditional (it ignores `RUST_BACKTRACE`) since the trace
/// only exists to explain failures that surface far away from the call site.
#[derive(Debug, Clone)]
pub struct OriginTrace(Arc<Backtrace>);

impl OriginTrace {
    /// Capture the current stack.
    pub fn capture() -> Self {
        Self(Arc::new(Backtrace::force_capture()))
    }

    /// The captured stack.
    pub fn backtrace(&self) -> &Backtrace {
        &self.0
    }

    /// Find the origin trace carried anywhere in an error's source chain.
    pub fn find<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a OriginTrace> {
        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(trace) = Self::attached(e) {
                return Some(trace);
            }
            current = e.source();
        }
        None
    }

    /// Origin trace attached directly to this error, without walking its sources.
    pub(crate) fn attached<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a OriginTrace> {
        if let Some(failure) = err.downcast_ref::<ConnectionFailure>() {
            return Some(&failure.origin);
        }
        // `io::Error::source` skips over its custom payload, so look inside.
        err.downcast_ref::<io::Error>()
            .and_then(io::Error::get_ref)
            .and_then(|inner| inner.downcast_ref::<ConnectionFailure>())
            .map(|failure| &failure.origin)
    }
}

impl fmt::Display for OriginTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "From connect:\n{}", self.0)
    }
}

/// I/O error raised by a traced connection, carrying where it was opened.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct ConnectionFailure {
    source: io::Error,
    origin: OriginTrace,
}

impl ConnectionFailure {
    /// Where the failing connection was opened.
    pub fn origin(&self) -> &OriginTrace {
        &self.origin
    }

    /// The error as raised by the connection.
    pub fn inner(&self) -> &io::Error {
        &self.source
    }

    pub fn into_inner(self) -> io::Error {
        self.source
    }
}

/// Attach `origin` to an I/O error, keeping its kind.
///
/// Errors that already carry an origin trace are returned unchanged.
pub fn attach_origin(err: io::Error, origin: &OriginTrace) -> io::Error {
    if OriginTrace::attached(&err).is_some() {
        return err;
    }
    io::Error::new(
        err.kind(),
        ConnectionFailure {
            source: err,
            origin: origin.clone(),
        },
    )
}
