use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancel `token` on the first SIGTERM or SIGINT.
///
/// Pass an [`Orchestrator::shutdown_token`](crate::Orchestrator::shutdown_token)
/// to let the pool drain gracefully. Must be called inside a tokio runtime.
pub fn cancel_on_signal(token: CancellationToken) -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, draining worker pool");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, draining worker pool");
            }
            _ = token.cancelled() => return,
        }

        token.cancel();
    });

    Ok(())
}
