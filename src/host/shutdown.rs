use tokio::select;
use tokio_util::sync::CancellationToken;

/// Waits for Ctrl-C or for some other part of the host to request shutdown. Browsers usually
/// stop the host by closing stdin, which the inbound reader turns into a cancellation.
pub async fn detect_shutdown(cancellation: CancellationToken) {
    select! {
        _ = tokio::signal::ctrl_c() => {
            cancellation.cancel();
        },
        _ = cancellation.cancelled() => (),
    };
}
