//!
//! Starts the Coordinator, its pools, and the periodic status report,
//! draining gracefully on SIGINT/SIGTERM.
//!
use crate::config::Settings;
use respool::factory::memory::MemoryFactory;
use tokio_util::sync::CancellationToken;

pub(crate) async fn serve(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let handle = respool::spawn(MemoryFactory::default(), Some(std::sync::Arc::new(respool::LogSink)));
    handle.add_pools(settings.pools.clone()).await?;

    let token = CancellationToken::new();
    let signal_handle = crate::signals::handle_signals(token.clone())?;

    let mut ticker = tokio::time::interval(settings.daemon.status_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match handle.stats().await {
                    Ok(report) => log::info!("\n{report}"),
                    Err(err) => log::warn!("failed to collect pool stats: {err}"),
                }
            }
            _ = token.cancelled() => break,
        }
    }

    log::debug!("closing signal handle");
    signal_handle.close();

    log::info!("draining coordinator ({}s grace period)", settings.daemon.shutdown_grace_period().as_secs());
    tokio::time::timeout(settings.daemon.shutdown_grace_period(), handle.stop()).await??;

    log::info!("daemon shutdown");
    Ok(())
}
