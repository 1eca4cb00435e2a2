//! Signal handling for graceful server shutdown.
//!
//! The first termination signal starts a graceful shutdown: handler
//! snapshots are persisted before exit. A second signal exits immediately.

use multiverse_event_system::ShutdownState;
use std::io;
use tokio::signal;
use tracing::{error, info, warn};

/// Waits for SIGINT or SIGTERM (Ctrl+C on Windows). Returns the signal's name.
pub async fn wait_for_signal() -> io::Result<&'static str> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        Ok(name)
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        Ok("Ctrl+C")
    }
}

/// Waits for the first signal, then marks `shutdown` as initiated.
pub async fn shutdown_on_signal(shutdown: &ShutdownState) -> io::Result<()> {
    let name = wait_for_signal().await?;
    info!("📡 Received {} - initiating graceful shutdown", name);
    shutdown.initiate_shutdown();
    Ok(())
}

/// Exits the process on the next signal.
pub fn exit_on_second_signal() {
    tokio::spawn(async {
        match wait_for_signal().await {
            Ok(name) => {
                warn!("{} received again! Exiting without persisting.", name);
                std::process::exit(1);
            }
            Err(e) => error!("Failed to set up forced shutdown signal handler: {e}"),
        }
    });
}
