use polysent_core::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Await `fut`, failing with `on_elapsed` if `limit` passes first
pub(crate) async fn with_timeout<T, F>(
    limit: Option<Duration>,
    fut: F,
    on_elapsed: impl FnOnce(Duration) -> Error,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(on_elapsed(limit)),
        },
        None => fut.await,
    }
}
