//! Process shutdown signals.
//!
//! [`wait_for_shutdown_signal`] completes on SIGINT, SIGTERM or SIGQUIT
//! (Ctrl-C only on non-Unix targets). [`graceful`] ties that to closing the hub.

use std::time::Duration;

use crate::ws::Hub;

#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Wait for a shutdown signal, then close the hub within `grace`.
///
/// Used as the `with_graceful_shutdown` future of the HTTP server, so the
/// listener stops accepting once this returns.
pub async fn graceful(hub: Hub, grace: Duration) {
    if let Err(e) = wait_for_shutdown_signal().await {
        tracing::error!(error = %e, "Failed to install signal handlers, shutting down");
    }
    tracing::info!("Shutdown signal received, closing hub");

    if tokio::time::timeout(grace, hub.close()).await.is_err() {
        tracing::warn!(
            grace_ms = grace.as_millis() as u64,
            "Hub did not drain in time, abandoning remaining connections"
        );
    }
}
