//! Daemon lifecycle for cryptostalker

use crate::config::Config;
use crate::Stalker;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

/// Start the daemon and run until SIGTERM or SIGINT.
///
/// Configuration and subscription failures are returned before the loop
/// starts; once running, nothing but a signal ends it.
pub async fn start(config: Config) -> anyhow::Result<()> {
    let mut stalker = Stalker::new(config)?;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!(
        "cryptostalker started (pid {}), watching {:?}",
        std::process::id(),
        stalker.config().watch
    );

    tokio::select! {
        result = stalker.run() => result?,

        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }

        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
        }
    }

    Ok(())
}
