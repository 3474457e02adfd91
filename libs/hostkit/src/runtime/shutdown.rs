use anyhow::Result;
use tokio::signal;

/// Wait for Ctrl+C or SIGTERM.
pub async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = signal::ctrl_c() => {
                res?;
                tracing::info!("Received Ctrl+C signal");
            }
            _ = term.recv() => {
                tracing::info!("Received SIGTERM signal");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C signal");
    }

    Ok(())
}
