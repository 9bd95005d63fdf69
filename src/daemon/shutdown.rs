use tokio::select;
use tokio_util::sync::CancellationToken;

/// Detects signals sent to the process. `stop` terminates the daemon with SIGTERM where one
/// exists, so that has to be caught next to ctrl-c.
///
/// On Windows detached processes can't detect signals sent to them, so this should be enhanced
/// in the future to support another way of sending signals.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        use tracing::error;

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(v) => v,
            Err(e) => {
                error!("Can't listen for SIGTERM {e:?}");
                select! {
                    _ = tokio::signal::ctrl_c() => {
                        cancelation.cancel();
                    },
                };
                return;
            }
        };

        select! {
            _ = tokio::signal::ctrl_c() => (),
            _ = terminate.recv() => (),
        };
        cancelation.cancel();
    }
    #[cfg(not(unix))]
    {
        select! {
            _ = tokio::signal::ctrl_c() => {
                cancelation.cancel();
            },
        };
    }
}
