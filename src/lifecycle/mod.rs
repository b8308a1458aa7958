//! Lifecycle supervision
//!
//! The supervisor owns the framework from construction until the process
//! exits, and decides what an uncaught failure means at each point of that
//! life.
//!
//! # Lifecycle Phases
//!
//! ```text
//! Uninitialized
//!    ↓  start()
//! Initializing      construct + Framework::init
//!    ↓                 (failure or uncaught failure: exit 1, no destroy)
//! Ready             SIGINT/SIGTERM handlers armed
//!    ↓  signal, or uncaught failure when not daemonized
//! ShuttingDown      Framework::destroy (failure logged, not fatal)
//!    ↓
//! Exited            logs flushed, process exits with code 1
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use domotic::lifecycle::Supervisor;
//!
//! let supervisor = Supervisor::builder(env, config).build();
//! let hub = supervisor
//!     .start(|source, env| Hub::open(source.path(), env))
//!     .await?;
//! ```

mod error;
mod framework;
mod shutdown;
mod signals;
mod state;
mod supervisor;

pub use error::{Failure, Terminated};
pub use framework::Framework;
pub use shutdown::{EXIT_FAILURE, ExitRequest, ProcessTerminator, ShutdownCoordinator, Terminator};
pub use signals::{OsSignals, Signal, SignalListener, SignalSource, SignalTrigger};
pub use state::{LifecycleState, StateCell};
pub use supervisor::{Supervisor, SupervisorBuilder};
