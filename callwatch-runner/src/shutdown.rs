//! Signal-driven shutdown

use tracing::{info, warn};

use crate::scheduler::StopHandle;

/// Installs a handler that stops the scheduler on SIGINT or SIGTERM
///
/// The scheduler finishes the jobs it is running, then terminates with
/// `TerminationReason::Stopped`.
pub fn install_shutdown_handler(handle: StopHandle) {
    tokio::spawn(async move {
        wait_for_signal().await;
        handle.stop();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Failed to install SIGTERM handler, only Ctrl-C stops the scheduler: {}", e);
            wait_for_ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = wait_for_ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT, initiating graceful shutdown"),
        Err(e) => {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
