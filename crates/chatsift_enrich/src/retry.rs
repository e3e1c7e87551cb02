//! Retry loop over result variants with exponential backoff. Only
//! retryable errors are retried; terminal errors fail fast.

use crate::ModelError;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt.
    pub initial_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
        }
    }
}

/// Run `operation` until it succeeds, fails terminally, or attempts are
/// exhausted. With the defaults the waits are 2 s, 4 s, 8 s.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    op_name: &str,
    operation: F,
) -> Result<T, ModelError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ModelError>>,
{
    let mut delay = config.initial_delay;
    let mut last_error = None;

    for attempt in 1..=config.max_attempts.max(1) {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("{op_name} succeeded on attempt {attempt}");
                }
                return Ok(value);
            }
            Err(e @ ModelError::Terminal(_)) => {
                tracing::error!("{op_name} failed terminally: {e}");
                return Err(e);
            }
            Err(e @ ModelError::Retryable(_)) => {
                tracing::warn!(
                    "{op_name} attempt {attempt}/{} failed: {e}",
                    config.max_attempts
                );
                last_error = Some(e);
            }
        }

        if attempt < config.max_attempts {
            tracing::info!(
                "{op_name} retrying in {:.1}s (attempt {}/{})",
                delay.as_secs_f64(),
                attempt + 1,
                config.max_attempts
            );
            tokio::time::sleep(delay).await;
            delay = Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_factor);
        }
    }

    Err(last_error
        .unwrap_or_else(|| ModelError::Retryable(format!("{op_name}: no attempts executed"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_retryable_failures() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig::default();

        let result = with_retry(&config, "test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ModelError::Retryable("503".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_fails_fast() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig::default();

        let result: Result<u32, _> = with_retry(&config, "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ModelError::Terminal("400".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(ModelError::Terminal(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_last_error() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig::default();

        let result: Result<u32, _> = with_retry(&config, "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ModelError::Retryable("timeout".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(ModelError::Retryable(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_between_attempts() {
        let config = RetryConfig::default();
        let started = tokio::time::Instant::now();

        let _: Result<u32, _> = with_retry(&config, "test", || async {
            Err(ModelError::Retryable("again".to_string()))
        })
        .await;

        // 2 s + 4 s of sleep across the two retries.
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }
}
