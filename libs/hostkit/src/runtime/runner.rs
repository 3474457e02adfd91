//! Host runner.
//!
//! Phase order: **discover → load + start (in order) → wait → stop (bounded) → unload**.
//! Shutdown can be driven by OS signals, an external `CancellationToken`,
//! or an arbitrary future.

use std::{future::Future, pin::Pin};

use tokio_util::sync::CancellationToken;

use crate::config::ConfigSource;
use crate::registry::FactoryRegistry;
use crate::runtime::shutdown;
use crate::runtime::{ComponentOrchestrator, HostSettings};

/// How the host should decide when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, we initiate shutdown.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

/// Options for running the host.
pub struct RunOptions {
    pub settings: HostSettings,
    /// Resolved configuration handed to every component factory.
    pub config: ConfigSource,
    pub factories: FactoryRegistry,
    pub shutdown: ShutdownOptions,
}

/// Full cycle: load + start → wait → stop → unload.
///
/// A load or start failure unloads whatever was already registered and is returned
/// as the host's startup error.
pub async fn run(opts: RunOptions) -> anyhow::Result<()> {
    let cancel = match &opts.shutdown {
        ShutdownOptions::Token(t) => t.clone(),
        _ => CancellationToken::new(),
    };

    match opts.shutdown {
        ShutdownOptions::Signals => {
            let c = cancel.clone();
            tokio::spawn(async move {
                match shutdown::wait_for_shutdown().await {
                    Ok(()) => {
                        tracing::info!("shutdown: signal received");
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "shutdown: primary waiter failed; falling back to ctrl_c()"
                        );
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
                c.cancel();
            });
        }
        ShutdownOptions::Future(waiter) => {
            let c = cancel.clone();
            tokio::spawn(async move {
                waiter.await;
                tracing::info!("shutdown: external future completed");
                c.cancel();
            });
        }
        ShutdownOptions::Token(_) => {
            tracing::info!("shutdown: external token will control lifecycle");
        }
    }

    let stopping_timeout = opts.settings.stopping_timeout;
    let host = ComponentOrchestrator::new(opts.settings, opts.factories, opts.config);

    if let Err(e) = host.run_components(cancel.clone()).await {
        host.stop_all(stopping_timeout).await;
        host.unload_all().await;
        return Err(anyhow::Error::new(e).context("host startup failed"));
    }
    tracing::info!(components = host.get_components().len(), "Host started");

    cancel.cancelled().await;

    tracing::info!("Phase: stop");
    host.stop_all(stopping_timeout).await;

    tracing::info!("Phase: unload");
    host.unload_all().await;

    Ok(())
}
