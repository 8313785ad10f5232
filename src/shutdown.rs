use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// The first signal cancels the returned token: the scheduler loop finishes
/// its current tick, the group sweeper stops, and the dashboard drains its
/// connections. In-flight assignments are not rolled back; they reconcile
/// on the next startup. A second signal skips the drain and exits
/// immediately.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, draining scheduler loops");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, draining scheduler loops");
            }
        }
        token_clone.cancel();

        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        tracing::warn!("Second signal received, exiting without draining");
        std::process::exit(1);
    });

    token
}
