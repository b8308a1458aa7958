use thiserror::Error;

pub type Result<T> = std::result::Result<T, DomoticError>;

#[derive(Debug, Error)]
pub enum DomoticError {
    #[error("Subsystem not found: {name}")]
    SubsystemNotFound { name: String },

    #[error("Subsystem registered twice: {name}")]
    DuplicateSubsystem { name: String },

    #[error("Failed to construct subsystem {name}: {message}")]
    SubsystemConstruction { name: String, message: String },

    #[error("Failed to downcast type: {type_name}")]
    DowncastFailed { type_name: String },

    #[error("Module not found: {name}")]
    ModuleNotFound { name: String },

    #[error("Failed to load module {name}: {message}")]
    ModuleLoadFailed { name: String, message: String },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Logging setup failed: {message}")]
    Logging { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DomoticError {
    pub(crate) fn construction(name: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::SubsystemConstruction {
            name: name.into(),
            message: err.to_string(),
        }
    }
}
