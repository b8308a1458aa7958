//! Failure interception
//!
//! Two pieces give uncaught failures a useful origin:
//!
//! - [`TracedConnector`] decorates whatever opens outbound connections. The
//!   stack at `connect` time is kept with the connection and attached to the
//!   error it later raises, since the error's own stack only shows where the
//!   runtime delivered it.
//! - [`FatalSink`] is the single destination for failures nobody handled:
//!   errors reported through a [`FailureReporter`] and panics caught by the
//!   process panic hook. The environment owns it so subsystems can report
//!   too; the supervisor drains it and applies [`FailurePolicy`] based on its
//!   lifecycle state.
//!
//! # Example
//!
//! ```rust,ignore
//! use domotic::interceptor::{instrument, TcpConnector};
//!
//! let connector = instrument(TcpConnector);
//! let reporter = supervisor.reporter();
//! reporter.spawn(async move {
//!     let mut gateway = connector.connect("192.168.1.20:502").await?;
//!     poll_gateway(&mut gateway).await
//! });
//! ```

mod connect;
mod sink;
mod trace;

pub use connect::{Connector, TcpConnector, TracedConnection, TracedConnector, instrument};
pub use sink::{
    Fatal, FailurePolicy, FailureReporter, FatalSink, clear_panic_reporter, install_panic_hook,
    log_uncaught,
};
pub use trace::{ConnectionFailure, OriginTrace, attach_origin};
