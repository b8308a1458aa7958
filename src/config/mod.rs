//! Supervisor settings
//!
//! Everything is read from process environment variables; the framework's
//! own configuration file is only located here, never parsed.

use crate::error::{DomoticError, Result};
use crate::logging::LoggingConfig;
use std::env;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Path of the framework configuration, used verbatim when set.
pub const CONFIG_ENV: &str = "DOMOTIC_CONFIG";
/// Any truthy value keeps the process alive after post-startup failures.
pub const DAEMONIZED_ENV: &str = "DOMOTIC_DAEMONIZED";
/// `EnvFilter` directive; falls back to `RUST_LOG`.
pub const LOG_ENV: &str = "DOMOTIC_LOG";
/// Any truthy value routes log output through a non-blocking worker.
pub const LOG_BUFFERED_ENV: &str = "DOMOTIC_LOG_BUFFERED";
/// Directory for the rolling log file when output is buffered.
pub const LOG_DIR_ENV: &str = "DOMOTIC_LOG_DIR";

/// Default configuration location, relative to the installation root.
pub const DEFAULT_CONFIG_RELATIVE: &str = "../../config.json";

/// Where the framework configuration is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Taken from [`CONFIG_ENV`].
    Override(PathBuf),
    /// Resolved from [`DEFAULT_CONFIG_RELATIVE`].
    Default(PathBuf),
}

impl ConfigSource {
    /// The configuration path, whichever way it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ConfigSource::Override(path) | ConfigSource::Default(path) => path,
        }
    }

    /// Whether the path came from [`CONFIG_ENV`].
    pub fn is_override(&self) -> bool {
        matches!(self, ConfigSource::Override(_))
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path().display())
    }
}

/// Supervisor settings taken from the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub config_source: ConfigSource,
    pub daemonized: bool,
    pub logging: LoggingConfig,
}

impl SupervisorConfig {
    /// Read the settings from the process environment, resolving the default
    /// configuration path against the directory of the running executable.
    pub fn from_env() -> Result<Self> {
        let root = install_root()?;
        Ok(Self::from_lookup(&root, |key| env::var(key).ok()))
    }

    /// Build the settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(install_root: &Path, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_source = match lookup(CONFIG_ENV).filter(|path| !path.is_empty()) {
            Some(path) => ConfigSource::Override(PathBuf::from(path)),
            None => ConfigSource::Default(normalize(&install_root.join(DEFAULT_CONFIG_RELATIVE))),
        };

        let filter = lookup(LOG_ENV)
            .or_else(|| lookup("RUST_LOG"))
            .filter(|directive| !directive.is_empty())
            .unwrap_or_else(|| LoggingConfig::default().filter);

        Self {
            config_source,
            daemonized: lookup(DAEMONIZED_ENV).is_some_and(|v| is_truthy(&v)),
            logging: LoggingConfig {
                filter,
                buffered: lookup(LOG_BUFFERED_ENV).is_some_and(|v| is_truthy(&v)),
                directory: lookup(LOG_DIR_ENV)
                    .filter(|dir| !dir.is_empty())
                    .map(PathBuf::from),
            },
        }
    }
}

/// Directory containing the running executable.
pub fn install_root() -> Result<PathBuf> {
    let exe = env::current_exe()?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| DomoticError::Config {
            message: format!("executable path {} has no parent", exe.display()),
        })
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    !(value.is_empty() || value == "0" || value.eq_ignore_ascii_case("false"))
}

// Lexical only; the file does not need to exist yet.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let last = out.components().next_back();
                let at_root = matches!(last, Some(Component::RootDir | Component::Prefix(_)));
                let climbing = matches!(last, None | Some(Component::ParentDir));
                if climbing {
                    out.push("..");
                } else if !at_root {
                    out.pop();
                }
            }
            other => out.push(other),
        }
    }
    out
}
