//! Rate-limit retry with linear backoff.
//!
//! Only [`VisionError::RateLimited`] is retried. Retry `n` (1-based) waits
//! `base_delay × n` before the next attempt, so with the default base of
//! 2000 ms the waits are 2 s, 4 s, 6 s, ... A unit makes at most
//! `1 + max_retries` calls. Budgets are per call to [`RetryPolicy::run`]; no
//! state is shared between units.

use crate::config::PipelineConfig;
use crate::error::{UnitError, VisionError};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(2000),
        }
    }
}

/// A successful unit and how many retries it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub retries: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.checked_mul(retry).unwrap_or(Duration::MAX)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent.
    ///
    /// `on_retry(n, delay)` is called before each wait so callers can surface
    /// the backoff in their own progress log.
    pub async fn run<T, F, Fut, R>(
        &self,
        unit: &str,
        mut op: F,
        mut on_retry: R,
    ) -> Result<Retried<T>, UnitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VisionError>>,
        R: FnMut(u32, Duration),
    {
        let mut retries = 0u32;
        loop {
            match op().await {
                Ok(value) => {
                    if retries > 0 {
                        debug!("{unit}: succeeded after {retries} retries");
                    }
                    return Ok(Retried { value, retries });
                }
                Err(VisionError::RateLimited { message }) => {
                    if retries >= self.max_retries {
                        warn!("{unit}: giving up after {retries} retries: {message}");
                        return Err(UnitError::RetriesExhausted {
                            unit: unit.to_string(),
                            retries,
                            detail: message,
                        });
                    }
                    retries += 1;
                    let delay = self.delay_for(retries);
                    warn!(
                        "{unit}: rate limited, retry {retries}/{} in {} ms",
                        self.max_retries,
                        delay.as_millis()
                    );
                    on_retry(retries, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(VisionError::Failed { message }) => {
                    warn!("{unit}: {message}");
                    return Err(UnitError::VisionFailed {
                        unit: unit.to_string(),
                        detail: message,
                    });
                }
            }
        }
    }
}
