use futures::Future;
use reposync::config::RetryConfig;

/// Runs `op` until it succeeds, fails with a non transient error,
/// or `policy.attempts` is reached.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryConfig,
    what: &str,
    mut op: F,
) -> reposync::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = reposync::Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_transient() && attempt < policy.attempts => {
                let backoff = policy.backoff(attempt);
                log::warn!(
                    "{what}: {err} (attempt {attempt}/{}), retrying in {}ms",
                    policy.attempts,
                    backoff.as_millis()
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            res => return res,
        }
    }
}
