//! Retries for transient database failures.

use crate::config::DatabaseOptions;
use crate::error::DbResult;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// How many retries follow the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
    Limited(u32),
    Unlimited,
}

impl RetryLimit {
    /// Map the `max_retries` option, where `-1` means unlimited.
    pub fn from_max_retries(max_retries: i64) -> Self {
        if max_retries < 0 {
            Self::Unlimited
        } else {
            Self::Limited(u32::try_from(max_retries).unwrap_or(u32::MAX))
        }
    }

    fn allows(&self, retries_done: u64) -> bool {
        match self {
            Self::Limited(max) => retries_done < u64::from(*max),
            Self::Unlimited => true,
        }
    }
}

/// Retry policy for deadlocks and lost connections.
///
/// Any other error, and any success, ends the loop immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    limit: RetryLimit,
    initial_delay: Duration,
    /// Cap for exponential backoff; `None` keeps the delay constant.
    max_delay: Option<Duration>,
    exponential_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_options(&DatabaseOptions::default())
    }
}

impl RetryPolicy {
    pub fn new(limit: RetryLimit, initial_delay: Duration) -> Self {
        Self {
            limit,
            initial_delay,
            max_delay: None,
            exponential_base: 2.0,
        }
    }

    /// Policy from `max_retries` and `retry_interval`.
    pub fn from_options(options: &DatabaseOptions) -> Self {
        Self::new(
            RetryLimit::from_max_retries(options.max_retries),
            options.retry_interval_duration(),
        )
    }

    /// Double the delay after each retry, up to `max_delay`.
    pub fn with_backoff(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn limit(&self) -> RetryLimit {
        self.limit
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.max_delay {
            None => self.initial_delay,
            Some(max_delay) => {
                let factor = self.exponential_base.powi(retry.min(63) as i32);
                let secs = self.initial_delay.as_secs_f64() * factor;
                if !secs.is_finite() || secs >= max_delay.as_secs_f64() {
                    max_delay
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }

    /// Run `operation`, retrying while it fails with a retryable error.
    ///
    /// `operation` is called once per attempt and must build all of its
    /// state (session, transaction) anew each time.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> DbResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let mut retries: u64 = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if !self.limit.allows(retries) => {
                    warn!(
                        attempts = retries + 1,
                        error = %err,
                        "Operation failed, retries exhausted"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.delay_for(u32::try_from(retries).unwrap_or(u32::MAX));
                    warn!(
                        attempt = retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Operation failed, retrying"
                    );
                    sleep(delay).await;
                    retries += 1;
                }
            }
        }
    }
}

/// Run `operation` with the default policy for `options`.
pub async fn with_retries<F, Fut, T>(options: &DatabaseOptions, operation: F) -> DbResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    RetryPolicy::from_options(options).run(operation).await
}
