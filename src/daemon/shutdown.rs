use tokio::select;
use tokio_util::sync::CancellationToken;

/// Cancels `cancelation` on ctrl-c. Returns as soon as anything else cancels it, so the daemon
/// doesn't keep waiting for a signal after the browser went away.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        _ = tokio::signal::ctrl_c() => {
            cancelation.cancel();
        },
        _ = cancelation.cancelled() => (),
    };
}
