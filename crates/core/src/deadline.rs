use std::future::Future;
use std::time::Duration;

/// Runs `future` with an upper bound, mapping expiry through `on_timeout`.
pub async fn within<F, T, E>(limit: Duration, future: F, on_timeout: impl FnOnce(Duration) -> E) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(limit)),
    }
}
