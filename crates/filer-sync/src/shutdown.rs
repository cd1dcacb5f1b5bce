//! Shutdown signalling shared by pipelines and the buffer flusher.

use tokio::sync::watch;

/// Resolve once `true` has been sent on `shutdown`.
///
/// A dropped sender is not a request to stop: tasks started without a
/// live handle keep running until the process exits.
pub(crate) async fn requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
