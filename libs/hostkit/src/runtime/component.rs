//! One hosted component: its boundary, its runnable units and its lifecycle state.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::ComponentConfig;
use crate::contracts::HostableComponent;
use crate::discovery;
use crate::error::HostError;
use crate::lifecycle::{ComponentState, LifecycleOp, StartGate};
use crate::loader::{BoundaryOptions, IsolationBoundary, LoadedModule};
use crate::registry::FactoryRegistry;

type Units = Vec<Arc<dyn HostableComponent>>;

pub struct HostedComponent {
    path: PathBuf,
    identity: String,
    state: RwLock<ComponentState>,
    entry: Arc<LoadedModule>,
    boundary: Mutex<Option<Arc<IsolationBoundary>>>,
    units: RwLock<Units>,
    gate: Mutex<StartGate>,
}

impl std::fmt::Debug for HostedComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedComponent")
            .field("path", &self.identity)
            .field("state", &self.state())
            .field("units", &self.unit_count())
            .finish()
    }
}

impl HostedComponent {
    /// Open a boundary for `path`, load the entry module and its dependencies,
    /// then construct runnable units from the exported factories.
    pub fn load(
        path: &Path,
        opts: &BoundaryOptions,
        factories: &FactoryRegistry,
        config: &ComponentConfig,
    ) -> Result<Arc<Self>, HostError> {
        let identity = path.display().to_string();
        let mut state = ComponentState::Unloaded;
        advance(&identity, &mut state, ComponentState::Loading)?;

        let loaded = (|| {
            let boundary = Arc::new(IsolationBoundary::open(path, opts)?);
            let entry = boundary.load_entry()?;
            let units = discovery::discover_units(&boundary, factories, config)?;
            Ok::<_, HostError>((boundary, entry, units))
        })();

        let (boundary, entry, units) = match loaded {
            Ok(v) => v,
            Err(e) => {
                advance(&identity, &mut state, ComponentState::Failed)?;
                return Err(e);
            }
        };
        advance(&identity, &mut state, ComponentState::Loaded)?;

        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            identity,
            state: RwLock::new(state),
            entry,
            boundary: Mutex::new(Some(boundary)),
            units: RwLock::new(units),
            gate: Mutex::new(StartGate::open()),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Display form of the source path, used in logs and errors.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> ComponentState {
        *self.state.read()
    }

    pub fn entry_module(&self) -> &Arc<LoadedModule> {
        &self.entry
    }

    pub fn boundary(&self) -> Option<Arc<IsolationBoundary>> {
        self.boundary.lock().clone()
    }

    pub fn unit_count(&self) -> usize {
        self.units.read().len()
    }

    /// Completes when a pending asynchronous start has finished.
    pub async fn wait_started(&self) {
        let gate = self.gate.lock().clone();
        gate.wait().await;
    }

    fn transition(&self, to: ComponentState) -> Result<(), HostError> {
        let mut state = self.state.write();
        advance(&self.identity, &mut *state, to)
    }

    fn units(&self) -> Units {
        self.units.read().clone()
    }

    /// Start units in order. On failure the already started units are stopped in reverse
    /// and the component ends up `Failed`.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), HostError> {
        self.transition(ComponentState::Starting)?;
        self.start_units(cancel).await
    }

    async fn start_units(&self, cancel: CancellationToken) -> Result<(), HostError> {
        let units = self.units();

        for (idx, unit) in units.iter().enumerate() {
            let (u, token) = (Arc::clone(unit), cancel.clone());
            if let Err(source) = isolated(async move { u.start(token).await }).await {
                for started in units[..idx].iter().rev() {
                    let (u, token) = (Arc::clone(started), cancel.clone());
                    if let Err(e) = isolated(async move { u.stop(token).await }).await {
                        tracing::warn!(component = %self.identity, error = %e, "Failed to roll back started unit");
                    }
                }
                self.transition(ComponentState::Failed)?;
                return Err(HostError::Lifecycle {
                    component: self.identity.clone(),
                    op: LifecycleOp::Start,
                    source,
                });
            }
        }

        self.transition(ComponentState::Running)
    }

    /// Start on a background task. Pause/resume/stop wait until it finishes.
    pub fn start_detached(self: &Arc<Self>, cancel: CancellationToken) -> Result<(), HostError> {
        self.transition(ComponentState::Starting)?;
        let gate = StartGate::pending();
        *self.gate.lock() = gate.clone();

        let this = Arc::clone(self);
        let task = async move {
            let _open = OpenOnDrop(gate);
            match this.start_units(cancel).await {
                Ok(()) => tracing::info!(component = %this.identity, "Component started"),
                Err(e) => tracing::error!(
                    component = %this.identity,
                    error = %e.display_chain(),
                    "Asynchronous start failed"
                ),
            }
        };
        tokio::spawn(task.in_current_span());
        Ok(())
    }

    /// Pause units in reverse order. Returns `false` when the component is not running.
    pub async fn pause(&self) -> Result<bool, HostError> {
        self.wait_started().await;
        if self.state() != ComponentState::Running {
            return Ok(false);
        }
        let units = self.units();
        for unit in units.iter().rev() {
            let u = Arc::clone(unit);
            isolated(async move { u.pause().await })
                .await
                .map_err(|source| self.lifecycle_err(LifecycleOp::Pause, source))?;
        }
        self.transition(ComponentState::Paused)?;
        Ok(true)
    }

    /// Resume units in start order. Returns `false` when the component is not paused.
    pub async fn resume(&self) -> Result<bool, HostError> {
        self.wait_started().await;
        if self.state() != ComponentState::Paused {
            return Ok(false);
        }
        let units = self.units();
        for unit in units.iter() {
            let u = Arc::clone(unit);
            isolated(async move { u.resume().await })
                .await
                .map_err(|source| self.lifecycle_err(LifecycleOp::Resume, source))?;
        }
        self.transition(ComponentState::Running)?;
        Ok(true)
    }

    /// Stop every unit in reverse order, even if some fail. Ends in `Stopped`.
    /// Returns `false` when there was nothing to stop.
    pub async fn stop(&self, cancel: CancellationToken) -> Result<bool, HostError> {
        self.wait_started().await;
        if !self.state().is_active() {
            return Ok(false);
        }
        self.transition(ComponentState::Stopping)?;

        let mut first_err = None;
        let mut failed = 0usize;
        for unit in self.units().iter().rev() {
            let (u, token) = (Arc::clone(unit), cancel.clone());
            if let Err(e) = isolated(async move { u.stop(token).await }).await {
                failed += 1;
                first_err.get_or_insert(e);
            }
        }

        self.transition(ComponentState::Stopped)?;
        match first_err {
            None => Ok(true),
            Some(source) => Err(self.lifecycle_err(
                LifecycleOp::Stop,
                source.context(format!("{failed} unit(s) failed to stop")),
            )),
        }
    }

    /// Drop units and the boundary and mark the component `Unloaded`.
    ///
    /// Only bookkeeping is removed: module images and any native code a unit mapped
    /// stay resident for the life of the process.
    pub fn release(&self) {
        let previous = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, ComponentState::Unloaded)
        };
        if !previous.can_transition_to(ComponentState::Unloaded) {
            tracing::warn!(component = %self.identity, from = %previous, "Releasing component that did not stop cleanly");
        }

        self.units.write().clear();
        if let Some(boundary) = self.boundary.lock().take() {
            tracing::debug!(
                component = %self.identity,
                boundary = %boundary.id(),
                modules = boundary.loaded_modules().len(),
                "Boundary dropped; loaded code is not reclaimed"
            );
        }
    }

    fn lifecycle_err(&self, op: LifecycleOp, source: anyhow::Error) -> HostError {
        HostError::Lifecycle {
            component: self.identity.clone(),
            op,
            source,
        }
    }
}

/// Completes the start gate however the detached start task ends.
struct OpenOnDrop(StartGate);

impl Drop for OpenOnDrop {
    fn drop(&mut self) {
        self.0.complete();
    }
}

/// Run one unit call on its own task so a panic comes back as an error
/// instead of unwinding through the caller.
async fn isolated<F>(call: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    match tokio::spawn(call.in_current_span()).await {
        Ok(res) => res,
        Err(join) if join.is_panic() => {
            let payload = join.into_panic();
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(anyhow::anyhow!("unit panicked: {msg}"))
        }
        Err(join) => Err(anyhow::Error::new(join).context("unit task was cancelled")),
    }
}

fn advance(identity: &str, state: &mut ComponentState, to: ComponentState) -> Result<(), HostError> {
    if !state.can_transition_to(to) {
        return Err(HostError::InvalidTransition {
            component: identity.to_string(),
            from: *state,
            to,
        });
    }
    tracing::trace!(component = identity, from = %state, to = %to, "Component state changed");
    *state = to;
    Ok(())
}
