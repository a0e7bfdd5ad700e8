use std::future::Future;

use tokio::time::sleep;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

use crate::BackoffPolicy;
use crate::ConnectionError;
use crate::Error;
use crate::Result;

/// Runs `task` until it succeeds, at most `policy.max_retries` times.
///
/// Every attempt is bounded by `policy.timeout()`. Between attempts the task
/// sleeps for `policy.delay_for(attempt)`. The error of the final attempt is
/// returned once the budget is spent.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    task: F,
    policy: BackoffPolicy,
) -> Result<P>
where
    F: Fn() -> T,
    T: Future<Output = Result<P>>,
{
    let mut last_error = Error::Fatal("retry budget is zero".to_string());

    for attempt in 0..policy.max_retries {
        match timeout(policy.timeout(), task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(error)) => {
                warn!(attempt, %error, "task attempt failed");
                last_error = error;
            }
            Err(_) => {
                warn!(attempt, timeout = ?policy.timeout(), "task attempt timed out");
                last_error = ConnectionError::Timeout(policy.timeout()).into();
            }
        }

        if attempt + 1 < policy.max_retries {
            let delay = policy.delay_for(attempt);
            debug!(attempt, ?delay, "backing off before next attempt");
            sleep(delay).await;
        }
    }

    warn!(retries = policy.max_retries, "task failed after max retries");
    Err(last_error)
}
