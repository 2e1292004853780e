//! Termination signals, inbound and outbound.

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SupervisorError;

pub use deployd_core::subprocess::send_terminate;

/// Cancel `shutdown` on the first SIGTERM or SIGINT.
///
/// Handlers are installed before this returns, so a signal arriving right
/// after the call is not lost. The task also ends quietly when `shutdown`
/// is cancelled for any other reason.
pub fn listen_for_termination(shutdown: CancellationToken) -> Result<JoinHandle<()>, SupervisorError> {
    let mut terminate = signal(SignalKind::terminate()).map_err(SupervisorError::Signal)?;
    let mut interrupt = signal(SignalKind::interrupt()).map_err(SupervisorError::Signal)?;

    Ok(tokio::spawn(async move {
        let name = tokio::select! {
            _ = terminate.recv() => "SIGTERM",
            _ = interrupt.recv() => "SIGINT",
            _ = shutdown.cancelled() => return,
        };
        tracing::info!(signal = name, "Received termination signal, shutting down");
        shutdown.cancel();
    }))
}
