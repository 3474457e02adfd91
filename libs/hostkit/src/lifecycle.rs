//! Component lifecycle states and the async-start gate.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Lifecycle state of a hosted component.
///
/// ```text
/// Unloaded → Loading → Loaded → Starting → Running ⇄ Paused → Stopping → Stopped → Unloaded
///               └──────────────────┴→ Failed → Unloaded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentState {
    Unloaded,
    Loading,
    Loaded,
    Starting,
    Running,
    Paused,
    Stopping,
    Stopped,
    Failed,
}

impl ComponentState {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: ComponentState) -> bool {
        use ComponentState::*;
        matches!(
            (self, next),
            (Unloaded, Loading)
                | (Loading, Loaded)
                | (Loading, Failed)
                | (Loaded, Starting)
                | (Loaded, Unloaded)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Paused)
                | (Running, Stopping)
                | (Paused, Running)
                | (Paused, Stopping)
                | (Stopping, Stopped)
                | (Stopped, Unloaded)
                | (Failed, Unloaded)
        )
    }

    /// Running or paused: units are constructed and have not been stopped.
    pub fn is_active(self) -> bool {
        matches!(self, ComponentState::Running | ComponentState::Paused)
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Operation applied to a component's runnable units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleOp {
    Start,
    Pause,
    Resume,
    Stop,
    Unload,
}

impl LifecycleOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleOp::Start => "start",
            LifecycleOp::Pause => "pause",
            LifecycleOp::Resume => "resume",
            LifecycleOp::Stop => "stop",
            LifecycleOp::Unload => "unload",
        }
    }
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One-shot completion signal for an asynchronous start.
///
/// Cloned handles observe the same gate. Pause/resume/stop wait on it so they
/// never overlap with unit construction still running on a background task.
#[derive(Debug, Clone)]
pub struct StartGate {
    tx: Arc<watch::Sender<bool>>,
}

impl StartGate {
    /// A gate that is already open (synchronous start).
    pub fn open() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    /// A gate that stays closed until [`StartGate::complete`] is called.
    pub fn pending() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn complete(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_complete(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the start has completed (successfully or not).
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|done| *done).await;
    }
}
