//! Heartbeat component
//!
//! Emits a periodic beat while running. Components opt in by exporting
//! `component_factory:heartbeat` from any of their modules.

mod config;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use hostkit::{ComponentFactory, FactoryContext, HostableComponent};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use config::HeartbeatConfig;

pub const FACTORY_ID: &str = "heartbeat";

hostkit::inventory::submit! {
    hostkit::FactoryRegistration::new(FACTORY_ID, || Box::new(HeartbeatFactory))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HeartbeatFactory;

impl ComponentFactory for HeartbeatFactory {
    fn create_units(&self, ctx: &FactoryContext) -> anyhow::Result<Vec<Arc<dyn HostableComponent>>> {
        let cfg: HeartbeatConfig = ctx
            .config()
            .section(FACTORY_ID)
            .bind()
            .context("invalid heartbeat configuration")?;

        for lib in &cfg.require_native {
            let native = ctx.loader().load_native(lib)?;
            tracing::debug!(library = %native.name, path = %native.path.display(), "Native library available");
        }

        let name = cfg.label.clone().unwrap_or_else(|| {
            ctx.component_path()
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.trim_end_matches(".module").to_string())
                .unwrap_or_else(|| FACTORY_ID.to_string())
        });

        Ok(vec![Arc::new(Heartbeat::new(
            name,
            Duration::from_millis(cfg.interval_ms.max(1)),
        ))])
    }
}

/// One beating unit.
pub struct Heartbeat {
    name: String,
    interval: Duration,
    paused: Arc<AtomicBool>,
    beats: Arc<AtomicU64>,
    worker: Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
}

impl Heartbeat {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            paused: Arc::new(AtomicBool::new(false)),
            beats: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl HostableComponent for Heartbeat {
    async fn start(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            anyhow::bail!("heartbeat '{}' is already running", self.name);
        }

        let token = cancel.child_token();
        let child = token.clone();
        let name = self.name.clone();
        let interval = self.interval;
        let paused = Arc::clone(&self.paused);
        let beats = Arc::clone(&self.beats);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        if paused.load(Ordering::Relaxed) {
                            continue;
                        }
                        let n = beats.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::debug!(unit = %name, beat = n, "Heartbeat");
                    }
                }
            }
            tracing::debug!(unit = %name, "Heartbeat loop exited");
        });

        *worker = Some((handle, token));
        tracing::info!(unit = %self.name, interval = ?self.interval, "Heartbeat started");
        Ok(())
    }

    async fn pause(&self) -> anyhow::Result<()> {
        self.paused.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn resume(&self) -> anyhow::Result<()> {
        self.paused.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn stop(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let running = self.worker.lock().take();
        let Some((mut handle, token)) = running else {
            return Ok(());
        };
        token.cancel();

        tokio::select! {
            res = &mut handle => {
                res.context("heartbeat task panicked")?;
            }
            _ = cancel.cancelled() => {
                handle.abort();
                tracing::warn!(unit = %self.name, "Heartbeat stop cancelled; task aborted");
            }
        }

        tracing::info!(unit = %self.name, beats = self.beats(), "Heartbeat stopped");
        Ok(())
    }
}
