//! Single retry with backoff for recognition calls.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::RecognitionError;

/// Run `op`; if it fails with a transient error, wait `backoff` and run it
/// exactly once more. Non-transient errors are returned immediately.
pub async fn with_single_retry<T, F, Fut>(backoff: Duration, mut op: F) -> Result<T, RecognitionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RecognitionError>>,
{
    match op().await {
        Err(e) if e.is_transient() => {
            warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "recognition failed, retrying once");
            tokio::time::sleep(backoff).await;
            op().await
        }
        other => other,
    }
}
