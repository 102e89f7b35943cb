use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use crate::core::{Error, Result};

/// Runs `future` unless `cancel` fires first, in which case the future is dropped
/// and `Error::Cancelled` is returned.
pub async fn with_cancel<F, T>(cancel: &CancellationToken, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = future => result,
    }
}

/// Sleeps for `delay`, waking early with `Error::Cancelled`.
pub async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> Result<()> {
    with_cancel(cancel, async {
        tokio::time::sleep(delay).await;
        Ok(())
    })
    .await
}
