//! Failure values routed through the supervisor

use super::LifecycleState;
use crate::interceptor::OriginTrace;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fmt;
use std::panic::PanicHookInfo;
use thiserror::Error;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A fatal or uncaught failure.
///
/// Besides its message and source, a failure keeps the stack where it was
/// raised and, when it came from a traced connection, the stack where that
/// connection was opened. A failure marked silent has already been reported
/// by whoever raised it and is not logged again.
#[derive(Debug)]
pub struct Failure {
    message: String,
    source: Option<BoxError>,
    stack: Backtrace,
    origin: Option<OriginTrace>,
    silent: bool,
}

impl Failure {
    /// Failure with a message and the current stack.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
            stack: Backtrace::force_capture(),
            origin: None,
            silent: false,
        }
    }

    /// Wrap an error, lifting any origin trace from its source chain.
    pub fn from_error<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let origin = OriginTrace::find(&err).cloned();
        Self {
            message: err.to_string(),
            source: Some(Box::new(err)),
            stack: Backtrace::force_capture(),
            origin,
            silent: false,
        }
    }

    pub(crate) fn from_panic(info: &PanicHookInfo<'_>) -> Self {
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "Box<dyn Any>".to_string());
        let message = match info.location() {
            Some(location) => format!("panicked at {location}: {payload}"),
            None => format!("panicked: {payload}"),
        };
        Self::new(message)
    }

    /// Mark the failure as already reported.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Attach the stack of the connection that led here.
    pub fn with_origin(mut self, origin: OriginTrace) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Stack where the failure was raised, captured regardless of
    /// `RUST_BACKTRACE`.
    pub fn stack(&self) -> &Backtrace {
        &self.stack
    }

    /// Stack captured where the failing connection was opened.
    pub fn origin_trace(&self) -> Option<&OriginTrace> {
        self.origin.as_ref()
    }

    /// Message followed by the own stack and the origin trace, when present.
    pub fn detailed(&self) -> String {
        let mut out = self.message.clone();
        if self.stack.status() == BacktraceStatus::Captured {
            out.push('\n');
            out.push_str(&self.stack.to_string());
        }
        if let Some(origin) = &self.origin {
            out.push('\n');
            out.push_str(&origin.to_string());
        }
        out
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for Failure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn StdError + 'static))
    }
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        let origin = err.chain().find_map(OriginTrace::attached).cloned();
        Self {
            message: format!("{err:#}"),
            origin,
            source: Some(err.into()),
            stack: Backtrace::force_capture(),
            silent: false,
        }
    }
}

impl From<std::io::Error> for Failure {
    fn from(err: std::io::Error) -> Self {
        Self::from_error(err)
    }
}

impl From<crate::error::DomoticError> for Failure {
    fn from(err: crate::error::DomoticError) -> Self {
        Self::from_error(err)
    }
}

impl From<&str> for Failure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Startup gave up because process termination was requested.
///
/// With the default process terminator the process is gone before this value
/// could be observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("supervisor terminated while {state}")]
pub struct Terminated {
    pub state: LifecycleState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::attach_origin;
    use std::io;

    #[test]
    fn test_silent_marker() {
        let failure = Failure::new("already reported");
        assert!(!failure.is_silent());
        let failure = failure.silent();
        assert!(failure.is_silent());
        assert_eq!(failure.to_string(), "already reported");
    }

    #[test]
    fn test_origin_trace_is_lifted_from_source() {
        let origin = OriginTrace::capture();
        let err = attach_origin(io::ErrorKind::ConnectionRefused.into(), &origin);
        let failure = Failure::from(err);

        assert!(failure.origin_trace().is_some());
        assert!(failure.source().is_some());
        assert!(failure.detailed().contains("From connect:"));
    }

    #[test]
    fn test_origin_trace_survives_anyhow_context() {
        let origin = OriginTrace::capture();
        let err = attach_origin(io::ErrorKind::ConnectionReset.into(), &origin);
        let err = anyhow::Error::new(err).context("fetching device state");
        let failure = Failure::from(err);

        assert!(failure.message().starts_with("fetching device state"));
        assert!(failure.origin_trace().is_some());
    }

    #[test]
    fn test_own_stack_is_always_captured() {
        let failure = Failure::new("zigbee coordinator timed out");
        assert_eq!(failure.stack().status(), BacktraceStatus::Captured);

        let detailed = failure.detailed();
        let mut lines = detailed.lines();
        assert_eq!(lines.next(), Some("zigbee coordinator timed out"));
        assert!(lines.any(|line| line.trim_start().starts_with("0: ")));
    }

    #[test]
    fn test_plain_failure_has_no_origin() {
        let failure = Failure::from("rules did not load");
        assert!(failure.origin_trace().is_none());
        assert!(!failure.detailed().contains("From connect:"));
    }
}
