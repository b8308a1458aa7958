//! Contract of the supervised framework

use super::Failure;
use async_trait::async_trait;

/// The central framework object the supervisor drives.
///
/// The supervisor calls [`init`](Framework::init) exactly once and
/// [`destroy`](Framework::destroy) at most once, and only after `init` has
/// succeeded. The instance is shared with other collaborators (an API layer,
/// for instance) once it is ready, so both methods take `&self`.
///
/// # Example
///
/// ```rust,ignore
/// use domotic::lifecycle::{Failure, Framework};
/// use async_trait::async_trait;
///
/// struct Hub {
///     devices: DeviceManager,
/// }
///
/// #[async_trait]
/// impl Framework for Hub {
///     async fn init(&self) -> Result<(), Failure> {
///         self.devices.load_plugins().await?;
///         Ok(())
///     }
///
///     async fn destroy(&self) -> Result<(), Failure> {
///         self.devices.disconnect_all().await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Framework: Send + Sync {
    /// Bring the framework into a running state.
    async fn init(&self) -> Result<(), Failure>;

    /// Tear the framework down before the process exits.
    async fn destroy(&self) -> Result<(), Failure>;
}

#[async_trait]
impl<T: Framework + ?Sized> Framework for std::sync::Arc<T> {
    async fn init(&self) -> Result<(), Failure> {
        (**self).init().await
    }

    async fn destroy(&self) -> Result<(), Failure> {
        (**self).destroy().await
    }
}
