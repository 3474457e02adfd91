//! Lifecycle orchestrator.
//!
//! Owns the ordered registry of hosted components. The registry is append-only
//! while loading; start and resume walk it forward, pause, stop and unload walk
//! it in reverse. Every public operation holds the operation lock, so callers
//! racing each other still observe those orders.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::ConfigSource;
use crate::error::HostError;
use crate::lifecycle::LifecycleOp;
use crate::loader::{BoundaryOptions, LoadedModule};
use crate::policy::ResolutionPolicy;
use crate::registry::FactoryRegistry;
use crate::runtime::component::HostedComponent;

/// Default bound for stopping all components at shutdown.
pub const DEFAULT_STOPPING_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything the host needs to locate and supervise its components.
#[derive(Debug, Clone)]
pub struct HostSettings {
    /// Entry module paths, in load order.
    pub components: Vec<PathBuf>,
    pub shared_library_path: Option<PathBuf>,
    pub probing_paths: Vec<PathBuf>,
    pub resource_probing_paths: Vec<PathBuf>,
    pub policy: ResolutionPolicy,
    /// Start each component on a background task instead of awaiting it.
    pub async_start: bool,
    pub stopping_timeout: Duration,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            components: Vec::new(),
            shared_library_path: None,
            probing_paths: Vec::new(),
            resource_probing_paths: Vec::new(),
            policy: ResolutionPolicy::default(),
            async_start: false,
            stopping_timeout: DEFAULT_STOPPING_TIMEOUT,
        }
    }
}

pub struct ComponentOrchestrator {
    settings: HostSettings,
    boundary_opts: BoundaryOptions,
    factories: FactoryRegistry,
    config: ConfigSource,
    components: RwLock<Vec<Arc<HostedComponent>>>,
    op_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl ComponentOrchestrator {
    pub fn new(settings: HostSettings, factories: FactoryRegistry, config: ConfigSource) -> Self {
        let boundary_opts = BoundaryOptions {
            shared_library_path: settings.shared_library_path.clone(),
            probing_paths: settings.probing_paths.clone(),
            resource_probing_paths: settings.resource_probing_paths.clone(),
            policy: Arc::new(settings.policy.clone()),
        };
        Self {
            settings,
            boundary_opts,
            factories,
            config,
            components: RwLock::new(Vec::new()),
            op_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            forwarder: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    /// Token handed to every unit's `start`; cancelled when the host shuts down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ordered snapshot of the registered components.
    pub fn get_components(&self) -> Vec<Arc<HostedComponent>> {
        self.components.read().clone()
    }

    /// Load and start the configured components. Returns once every start has been
    /// dispatched; with `async_start` that is before the units finish starting.
    ///
    /// Cancelling `cancel` cancels the units' token. Only the token of the latest
    /// call is forwarded.
    pub async fn run_components(
        &self,
        cancel: CancellationToken,
    ) -> Result<Vec<Arc<LoadedModule>>, HostError> {
        let internal = self.cancel.clone();
        let forward = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => internal.cancel(),
                _ = internal.cancelled() => {}
            }
        });
        if let Some(previous) = self.forwarder.lock().replace(forward) {
            previous.abort();
        }

        let paths = self.settings.components.clone();
        self.load_all(&paths).await
    }

    /// Load, start and register each path in order.
    ///
    /// The first failure is logged and returned; components registered before it stay
    /// registered and the caller decides whether to unwind.
    pub async fn load_all(&self, paths: &[PathBuf]) -> Result<Vec<Arc<LoadedModule>>, HostError> {
        let _op = self.op_lock.lock().await;
        let mut entries = Vec::with_capacity(paths.len());

        for path in paths {
            tracing::info!(component = %path.display(), "Loading component");

            let component = match HostedComponent::load(
                path,
                &self.boundary_opts,
                &self.factories,
                &self.config.view(),
            ) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!(component = %path.display(), error = %e.display_chain(), "Failed to load component");
                    return Err(e);
                }
            };

            let started = if self.settings.async_start {
                component.start_detached(self.cancel.clone())
            } else {
                component.start(self.cancel.clone()).await
            };
            if let Err(e) = started {
                tracing::error!(component = %path.display(), error = %e.display_chain(), "Failed to start component");
                component.release();
                return Err(e);
            }

            tracing::info!(
                component = %path.display(),
                module = %component.entry_module().name,
                units = component.unit_count(),
                "Component loaded"
            );
            entries.push(component.entry_module().clone());
            self.components.write().push(component);
        }

        Ok(entries)
    }

    /// Pause running components in reverse registration order.
    pub async fn pause_all(&self) {
        let _op = self.op_lock.lock().await;
        for c in self.get_components().iter().rev() {
            if let Err(e) = c.pause().await {
                tracing::error!(component = %c.identity(), error = %e.display_chain(), "Failed to pause component");
            }
        }
    }

    /// Resume paused components in registration order.
    pub async fn resume_all(&self) {
        let _op = self.op_lock.lock().await;
        for c in self.get_components().iter() {
            if let Err(e) = c.resume().await {
                tracing::error!(component = %c.identity(), error = %e.display_chain(), "Failed to resume component");
            }
        }
    }

    /// Stop all active components concurrently, bounded by one shared deadline.
    ///
    /// The token passed to each `stop` is cancelled when the deadline elapses. Stops
    /// still running at that point are abandoned.
    pub async fn stop_all(&self, timeout: Duration) {
        let _op = self.op_lock.lock().await;
        self.cancel.cancel();
        if let Some(forward) = self.forwarder.lock().take() {
            forward.abort();
        }

        let deadline = Instant::now() + timeout;
        let stop_cancel = CancellationToken::new();

        let pending: Vec<_> = self
            .get_components()
            .into_iter()
            .rev()
            .map(|c| {
                let token = stop_cancel.clone();
                let worker = Arc::clone(&c);
                let task = async move { worker.stop(token).await };
                (c, tokio::spawn(task.in_current_span()))
            })
            .collect();

        let mut abandoned = 0usize;
        for (c, handle) in pending {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(Ok(_))) => {}
                Ok(Ok(Err(e))) => {
                    tracing::error!(component = %c.identity(), error = %e.display_chain(), "Failed to stop component");
                }
                Ok(Err(join)) => {
                    tracing::error!(component = %c.identity(), error = %join, "Stop task panicked");
                }
                Err(_) => {
                    stop_cancel.cancel();
                    abandoned += 1;
                    tracing::error!(
                        component = %c.identity(),
                        timeout = ?timeout,
                        "Component did not stop in time; abandoning"
                    );
                }
            }
        }

        if abandoned == 0 {
            tracing::info!("All components stopped");
        } else {
            tracing::warn!(abandoned, "Stop completed with abandoned components");
        }
    }

    /// Stop (if still active) and unload every component in reverse order, then
    /// clear the registry. Failures are logged per component and never stop the walk.
    pub async fn unload_all(&self) {
        let _op = self.op_lock.lock().await;
        let timeout = self.settings.stopping_timeout;

        for c in self.get_components().iter().rev() {
            let token = CancellationToken::new();
            match tokio::time::timeout(timeout, c.stop(token.clone())).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::error!(component = %c.identity(), error = %e.display_chain(), "Failed to unload component");
                }
                Err(_) => {
                    token.cancel();
                    let e = HostError::Lifecycle {
                        component: c.identity().to_string(),
                        op: LifecycleOp::Unload,
                        source: anyhow::anyhow!("stop did not finish within {timeout:?}"),
                    };
                    tracing::error!(component = %c.identity(), error = %e.display_chain(), "Failed to unload component");
                }
            }
            c.release();
            tracing::info!(component = %c.identity(), "Component unloaded");
        }

        let count = {
            let mut guard = self.components.write();
            let n = guard.len();
            guard.clear();
            n
        };
        if count > 0 {
            tracing::warn!(
                count,
                "Unloaded components remain resident: module code is not reclaimed until process exit"
            );
        }
    }
}
