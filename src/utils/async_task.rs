use std::future::Future;

use tokio::time::sleep;
use tokio::time::timeout;
use tracing::error;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Runs `task` until it succeeds, at most `policy.max_retries` times.
///
/// Every attempt is bounded by `policy.timeout_ms`; the delay between
/// attempts starts at `base_delay_ms` and doubles up to `max_delay_ms`.
/// After the last attempt the error of that attempt is returned.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    task: F,
    policy: BackoffPolicy,
) -> Result<P>
where
    F: Fn() -> T,
    T: Future<Output = Result<P>>,
{
    let mut retries = 0;
    let mut delay = policy.base_delay();
    let mut last_error = Error::RetryTaskFailed("task was never attempted".to_string());
    while retries < policy.max_retries {
        match timeout(policy.timeout(), task()).await {
            Ok(Ok(r)) => {
                return Ok(r);
            }
            Ok(Err(e)) => {
                warn!(attempt = retries + 1, "task failed with error: {:?}", &e);
                last_error = e;
            }
            Err(_) => {
                warn!(attempt = retries + 1, "task timed out after {:?}", policy.timeout());
                last_error = Error::RetryTimeout(policy.timeout());
            }
        };

        retries += 1;
        if retries < policy.max_retries {
            sleep(delay).await;
            delay = (delay * 2).min(policy.max_delay());
        } else {
            warn!("task failed after {} attempts", retries);
        }
    }
    Err(last_error)
}

/// Spawns a named background task and logs its failure instead of dropping it
pub(crate) fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    tokio::spawn(async move {
        if let Err(e) = task_fn().await {
            error!("spawned task: {name} stopped or encountered an error: {:?}", e);
        }
    })
}
