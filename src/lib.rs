//! # Domotic
//!
//! Process lifecycle supervisor for a plugin-based home automation framework.
//!
//! Domotic starts the framework, keeps track of where it is in its life, and
//! makes sure the process always ends the same way: destroy the framework if
//! it ever became ready, flush the logs, exit.
//!
//! ## Features
//!
//! - **Supervised startup**: construct and initialize the framework, with every
//!   failure on the way ending the process with exit code 1
//! - **Graceful shutdown**: SIGINT/SIGTERM destroy the framework once, however
//!   many arrive
//! - **Failure interception**: uncaught errors and panics are routed to one
//!   sink and handled according to the lifecycle state
//! - **Connection origins**: outbound connections remember where they were
//!   opened, so their late failures point back at the caller
//! - **Environment**: named subsystems and a module loader shared with plugins
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use domotic::prelude::*;
//!
//! struct Hub;
//!
//! #[async_trait]
//! impl Framework for Hub {
//!     async fn init(&self) -> Result<(), Failure> {
//!         Ok(())
//!     }
//!
//!     async fn destroy(&self) -> Result<(), Failure> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SupervisorConfig::from_env()?;
//!     let logs = init_logging(&config.logging)?;
//!     let env = Arc::new(Environment::builder(logs).build()?);
//!
//!     let supervisor = Supervisor::builder(env, config).build();
//!     if supervisor.start(|_, _| Ok::<_, Failure>(Hub)).await.is_ok() {
//!         supervisor.wait_for_exit().await;
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod environment;
pub mod error;
pub mod interceptor;
pub mod lifecycle;
pub mod logging;

#[cfg(test)]
mod test_support;

// Re-export core types
pub use config::{ConfigSource, SupervisorConfig};
pub use environment::{Environment, EnvironmentBuilder, ModuleLoader, SubsystemName};
pub use error::{DomoticError, Result};
pub use interceptor::{FailureReporter, OriginTrace, instrument};
pub use lifecycle::{Failure, Framework, LifecycleState, Supervisor, SupervisorBuilder, Terminated};
pub use logging::{LogHandle, LoggingConfig, init_logging};

pub use async_trait::async_trait;

/// Prelude module for convenient imports
///
/// ```
/// use domotic::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ConfigSource, SupervisorConfig};
    pub use crate::environment::{Environment, EnvironmentBuilder, ModuleLoader, SubsystemName};
    pub use crate::error::DomoticError;
    pub use crate::interceptor::{
        Connector, FailureReporter, TcpConnector, TracedConnector, instrument,
    };
    pub use crate::lifecycle::{
        Failure, Framework, LifecycleState, Signal, Supervisor, SupervisorBuilder, Terminated,
    };
    pub use crate::logging::{LogHandle, LoggingConfig, init_logging};
    pub use async_trait::async_trait;
    pub use std::sync::Arc;
}
