//! Cancellation helpers shared by every capability call.

use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Run `fut` until it completes or `cancel` fires, whichever comes first.
///
/// When the token fires first the future is dropped and `on_cancel()` is
/// returned, so a capability that ignores the token still yields promptly.
pub async fn run_cancellable<T, E, F>(
    cancel: &CancellationToken,
    fut: F,
    on_cancel: impl FnOnce() -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    if cancel.is_cancelled() {
        return Err(on_cancel());
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(on_cancel()),
        result = fut => result,
    }
}
