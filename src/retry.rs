use std::future::Future;

use crate::config::RetryPolicy;
use crate::error::ExtractError;

pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, ExtractError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExtractError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < attempts => {
                tracing::warn!(what, attempt, attempts, %err, "attempt failed; retrying");
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
