// ── Bounded unary calls ──

use std::future::Future;
use std::time::Duration;

use crate::error::CoreError;

/// Run one unary RPC under `timeout`, translating wire errors.
pub(crate) async fn bounded<T, F>(timeout: Duration, operation: &str, fut: F) -> Result<T, CoreError>
where
    F: Future<Output = Result<T, dmlink_api::Error>>,
{
    tracing::debug!(operation, "datamodel call");
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(CoreError::from),
        Err(_) => {
            tracing::debug!(operation, ?timeout, "datamodel call timed out");
            Err(CoreError::Timeout {
                timeout_secs: timeout.as_secs(),
            })
        }
    }
}
