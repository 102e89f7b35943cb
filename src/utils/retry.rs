use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use crate::core::{Error, Result};
use super::cancel::sleep_or_cancel;

/// Back-off between attempts
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    Fixed(Duration),
    Exponential {
        initial: Duration,
        multiplier: f64,
        max_delay: Duration,
    },
}

impl RetryStrategy {
    /// Delay before retry number `attempt` (0-based)
    pub fn get_delay(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Fixed(delay) => *delay,
            RetryStrategy::Exponential { initial, multiplier, max_delay } => {
                let delay = initial.as_secs_f64() * multiplier.powf(attempt as f64);
                Duration::try_from_secs_f64(delay.min(max_delay.as_secs_f64()))
                    .unwrap_or(*max_delay)
            }
        }
    }
}

pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub strategy: RetryStrategy,
    pub should_retry: Box<dyn Fn(&Error) -> bool + Send + Sync>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: RetryStrategy::Exponential {
                initial: Duration::from_secs(1),
                multiplier: 2.0,
                max_delay: Duration::from_secs(30),
            },
            should_retry: Box::new(Error::is_transient),
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or runs
/// out of attempts. Cancellation is never retried and interrupts the back-off.
pub async fn retry_with_config<F, Fut, T>(
    config: RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                attempt += 1;
                if error.is_cancelled() || attempt >= max_attempts || !(config.should_retry)(&error) {
                    return Err(error);
                }

                let delay = config.strategy.get_delay(attempt - 1);
                debug!(attempt, error = %error, delay_ms = delay.as_millis() as u64, "Retrying after failure");
                sleep_or_cancel(cancel, delay).await?;
            }
        }
    }
}

pub async fn retry<F, Fut, T>(cancel: &CancellationToken, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_config(RetryConfig::default(), cancel, operation).await
}

pub struct RetryBuilder {
    config: RetryConfig,
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryBuilder {
    pub fn new() -> Self {
        Self {
            config: RetryConfig::default(),
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn strategy(mut self, strategy: RetryStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn should_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.config.should_retry = Box::new(f);
        self
    }

    pub async fn run<F, Fut, T>(self, cancel: &CancellationToken, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_with_config(self.config, cancel, operation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryBuilder {
        RetryBuilder::new().strategy(RetryStrategy::Fixed(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_retry_success() {
        let count = AtomicU32::new(0);
        let result = fast()
            .should_retry(|_| true)
            .run(&CancellationToken::new(), || async {
                if count.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::server_error(502, "bad gateway"))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let count = AtomicU32::new(0);
        let result = fast()
            .max_attempts(3)
            .run(&CancellationToken::new(), || async {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::server_error(500, "down"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_is_not_retried() {
        let count = AtomicU32::new(0);
        let result = fast()
            .run(&CancellationToken::new(), || async {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::parse("garbage"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_is_not_retried() {
        let count = AtomicU32::new(0);
        let result = fast()
            .should_retry(|_| true)
            .run(&CancellationToken::new(), || async {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Cancelled)
            })
            .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let strategy = RetryStrategy::Exponential {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(strategy.get_delay(0), Duration::from_secs(1));
        assert_eq!(strategy.get_delay(2), Duration::from_secs(4));
        assert_eq!(strategy.get_delay(5), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_delay_never_overflows() {
        let strategy = RetryStrategy::Exponential {
            initial: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(strategy.get_delay(70), Duration::from_secs(10));
        assert_eq!(strategy.get_delay(u32::MAX), Duration::from_secs(10));
    }
}
