use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::discovery::FactoryContext;
use crate::error::HostError;
use crate::loader::{LoadedModule, NativeLibrary};

/// A constructed, lifecycle-controllable unit produced by a component factory.
#[async_trait]
pub trait HostableComponent: Send + Sync {
    /// Called once after construction. `cancel` fires when the host begins shutting down.
    async fn start(&self, cancel: CancellationToken) -> anyhow::Result<()>;

    async fn pause(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn resume(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// `cancel` is advisory: it fires when the host's stop timeout elapses.
    async fn stop(&self, cancel: CancellationToken) -> anyhow::Result<()>;
}

/// Constructs runnable units for one component.
///
/// Must be sync: construction is wiring only, long work belongs in `start`.
pub trait ComponentFactory: Send + Sync {
    fn create_units(&self, ctx: &FactoryContext) -> anyhow::Result<Vec<Arc<dyn HostableComponent>>>;
}

/// Loads further modules through the isolation boundary of the calling component.
pub trait ModuleLoader: Send + Sync {
    fn load_module(&self, name: &str) -> Result<Arc<LoadedModule>, HostError>;

    fn load_native(&self, name: &str) -> Result<NativeLibrary, HostError>;

    /// Culture-specific resource; `Ok(None)` when no such resource exists.
    fn load_resource(&self, name: &str, culture: &str)
        -> Result<Option<Arc<LoadedModule>>, HostError>;
}
