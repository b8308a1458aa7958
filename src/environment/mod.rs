//! Shared environment of subsystem handles.
//!
//! The environment is built once at process start, before the supervisor
//! runs. Subsystems are constructed in the fixed order of [`SubsystemName`],
//! each factory receiving the environment built so far, so a subsystem can
//! capture handles to the ones it depends on.

mod loader;
mod registry;
mod subsystem;

pub use loader::ModuleLoader;
pub use registry::{Environment, EnvironmentBuilder};
pub use subsystem::SubsystemName;
