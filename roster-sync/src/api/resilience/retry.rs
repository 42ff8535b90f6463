//! Retry policy with linear backoff

use log::{debug, warn};
use std::future::Future;

use super::config::RetryConfig;

/// Runs an async operation until it succeeds or the attempts run out
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute `operation`, retrying any error.
    ///
    /// `on_retry` is called with the failed attempt number and its error
    /// before sleeping. The last error is returned once attempts are exhausted.
    pub async fn execute<T, E, F, Fut, R>(
        &self,
        operation_name: &str,
        mut operation: F,
        mut on_retry: R,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        R: FnMut(u32, &E),
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", operation_name, attempt);
                    }
                    return Ok(value);
                }
                Err(err) if attempt >= max_attempts => {
                    warn!(
                        "{} failed after {} attempt(s): {}",
                        operation_name, attempt, err
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.config.delay_after(attempt);
                    on_retry(attempt, &err);
                    debug!(
                        "{} attempt {}/{} failed: {} (retrying in {:?})",
                        operation_name, attempt, max_attempts, err, delay
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
