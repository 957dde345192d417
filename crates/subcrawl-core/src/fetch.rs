use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::RetryPolicy;
use crate::error::AppError;
use crate::traits::Fetcher;

/// One completed fetch attempt, successful or not.
#[derive(Debug)]
pub struct FetchAttempt<'a> {
    pub url: &'a str,
    /// 1-indexed.
    pub attempt: u32,
    pub latency: Duration,
    pub error: Option<&'a AppError>,
}

/// Receives every fetch attempt as it completes.
pub trait AttemptObserver: Send + Sync {
    fn on_attempt(&self, attempt: &FetchAttempt<'_>) -> impl Future<Output = ()> + Send;
}

impl AttemptObserver for () {
    async fn on_attempt(&self, _attempt: &FetchAttempt<'_>) {}
}

/// Fetch `url`, retrying transient failures with capped exponential backoff.
///
/// `http_4xx` fails immediately. The observer sees each attempt, including
/// its latency, before the next one starts.
pub async fn fetch_with_retry<F, O>(
    fetcher: &F,
    url: &str,
    policy: &RetryPolicy,
    observer: &O,
) -> Result<String, AppError>
where
    F: Fetcher,
    O: AttemptObserver,
{
    let mut attempt = 0;
    loop {
        let started = Instant::now();
        let result = fetcher.fetch(url).await;
        let latency = started.elapsed();

        observer
            .on_attempt(&FetchAttempt {
                url,
                attempt: attempt + 1,
                latency,
                error: result.as_ref().err(),
            })
            .await;

        match result {
            Ok(body) => return Ok(body),
            Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(
                    %url,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying fetch"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
