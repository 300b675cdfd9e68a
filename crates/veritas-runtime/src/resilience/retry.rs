//! Retry with backoff for provider calls.
//!
//! Built on `backon`: [`RetryPolicy`] turns into a `BackoffBuilder` whose
//! iterator yields at most `max_retries` delays, so an operation runs at
//! most `max_retries + 1` times. Only transient errors are retried
//! (see [`ProviderError::is_retryable`]).

use backon::{BackoffBuilder, Retryable};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::config::duration_str;
use crate::providers::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// `base * (n + 1)`
    Linear,
    /// `base * 2^n`
    #[default]
    Exponential,
    /// `base`
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,

    #[serde(with = "duration_str")]
    pub base_delay: Duration,

    #[serde(with = "duration_str")]
    pub max_delay: Duration,

    pub backoff: BackoffKind,

    /// Upper bound of random extra delay, as a fraction of the delay
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff: BackoffKind::Exponential,
            jitter: 0.10,
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry `attempt` (0-indexed), capped, without jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let secs = match self.backoff {
            BackoffKind::Linear => base * f64::from(attempt + 1),
            BackoffKind::Exponential => base * 2f64.powi(attempt.min(62) as i32),
            BackoffKind::Fixed => base,
        };
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// `delay` plus up to `jitter` of random extra time.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.0..=self.jitter.min(1.0));
        delay + delay.mul_f64(factor)
    }

    fn backoff(&self) -> PolicyBackoffBuilder {
        PolicyBackoffBuilder {
            policy: self.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PolicyBackoffBuilder {
    policy: RetryPolicy,
}

impl BackoffBuilder for PolicyBackoffBuilder {
    type Backoff = PolicyBackoff;

    fn build(self) -> Self::Backoff {
        PolicyBackoff {
            policy: self.policy,
            attempt: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PolicyBackoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Iterator for PolicyBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_retries {
            return None;
        }
        let delay = self.policy.jittered_delay(self.attempt);
        self.attempt += 1;
        Some(delay)
    }
}

/// Runs operations under a retry policy.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` under `policy`; returns the last error once retries run out
    /// or the error is not retryable.
    pub async fn execute<T, F, Fut>(&self, op: F, policy: &RetryPolicy) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        op.retry(policy.backoff())
            .when(|e: &ProviderError| e.is_retryable())
            .notify(|e: &ProviderError, delay: Duration| {
                tracing::debug!(
                    error = %e,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "retrying after transient provider error"
                );
            })
            .await
    }

    /// `execute` with this executor's own policy.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.execute(op, &self.policy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_retries: u32, backoff: BackoffKind) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_backoff_formulas() {
        let linear = policy(5, BackoffKind::Linear);
        assert_eq!(linear.delay(0), Duration::from_millis(100));
        assert_eq!(linear.delay(2), Duration::from_millis(300));

        let exponential = policy(5, BackoffKind::Exponential);
        assert_eq!(exponential.delay(0), Duration::from_millis(100));
        assert_eq!(exponential.delay(3), Duration::from_millis(800));
        // capped at max_delay
        assert_eq!(exponential.delay(4), Duration::from_secs(1));
        assert_eq!(exponential.delay(200), Duration::from_secs(1));

        let fixed = policy(5, BackoffKind::Fixed);
        assert_eq!(fixed.delay(7), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let policy = RetryPolicy {
            jitter: 0.10,
            ..policy(3, BackoffKind::Fixed)
        };
        for _ in 0..100 {
            let d = policy.jittered_delay(0);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(110));
        }
    }

    #[test]
    fn test_backoff_yields_max_retries_delays() {
        let delays: Vec<Duration> = policy(3, BackoffKind::Linear).backoff().build().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(300)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let executor = RetryExecutor::default();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result = executor
            .execute(
                || {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        if n < 2 {
                            Err(ProviderError::ApiError {
                                status: 503,
                                message: "unavailable".into(),
                            })
                        } else {
                            Ok(n)
                        }
                    }
                },
                &policy(3, BackoffKind::Exponential),
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_last_error() {
        let executor = RetryExecutor::default();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), _> = executor
            .execute(
                || {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        Err(ProviderError::HttpError(format!("reset {}", n)))
                    }
                },
                &policy(2, BackoffKind::Fixed),
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(result, Err(ProviderError::HttpError(m)) if m == "reset 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        for err in [
            ProviderError::ApiError {
                status: 401,
                message: String::new(),
            },
            ProviderError::ApiError {
                status: 422,
                message: String::new(),
            },
            ProviderError::ParseError("bad json".into()),
        ] {
            let calls = Arc::new(AtomicU32::new(0));
            let counter = calls.clone();
            let result: Result<(), _> = RetryExecutor::new(policy(5, BackoffKind::Fixed))
                .run(|| {
                    let counter = counter.clone();
                    let err = err.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(err)
                    }
                })
                .await;
            assert!(result.is_err());
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }
}
