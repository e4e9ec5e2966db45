use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
        }
    }
}

/// Runs `f` until it succeeds, the error is not retryable, or
/// `max_attempts` is exhausted. The last error is returned as-is.
pub async fn retry_async<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut should_retry: P,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: FnMut(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 1u32;

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_attempts && should_retry(&e) => {
                tracing::warn!(attempt, max_attempts, error = %e, "attempt failed, retrying");
                tokio::time::sleep(delay).await;
                delay = Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_factor);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
